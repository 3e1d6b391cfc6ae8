//! Vulkan descriptor set and resource binding management
//!
//! Layouts and pools are built through plain accumulating builders and a single
//! validating `build` call. Allocation from a [`DescriptorPool`] reports
//! exhaustion as `None` instead of an error; callers decide whether to build
//! another pool. No automatic pool growth is attempted.

use ash::{vk, Device};
use std::collections::BTreeMap;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// Binding table of a descriptor set layout, keyed by binding index
#[derive(Debug, Clone, Default)]
pub struct DescriptorBindings {
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
}

impl DescriptorBindings {
    /// Declare a binding; an index can only be declared once
    pub fn insert(
        &mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> VulkanResult<()> {
        if self.bindings.contains_key(&binding) {
            return Err(VulkanError::DuplicateBinding { binding });
        }

        let entry = vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(count)
            .stage_flags(stage_flags)
            .build();
        self.bindings.insert(binding, entry);
        Ok(())
    }

    /// Look up a declared binding
    pub fn get(&self, binding: u32) -> Option<&vk::DescriptorSetLayoutBinding> {
        self.bindings.get(&binding)
    }

    /// Descriptor type of `binding`, which must exist and hold exactly one descriptor
    pub fn single_resource_type(&self, binding: u32) -> VulkanResult<vk::DescriptorType> {
        let entry = self
            .get(binding)
            .ok_or(VulkanError::UnknownBinding { binding })?;
        if entry.descriptor_count != 1 {
            return Err(VulkanError::BindingCountMismatch {
                binding,
                count: entry.descriptor_count,
            });
        }
        Ok(entry.descriptor_type)
    }

    /// Number of declared bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is declared
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings in ascending index order
    pub fn to_vec(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.bindings.values().copied().collect()
    }
}

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: DescriptorBindings,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding; fails if `binding` was already added
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> VulkanResult<Self> {
        self.bindings
            .insert(binding, descriptor_type, stage_flags, count)?;
        Ok(self)
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let entries = self.bindings.to_vec();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&entries);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::Api)?;
        log::debug!("Created descriptor set layout with {} binding(s)", entries.len());

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: DescriptorBindings,
}

impl DescriptorSetLayout {
    /// Start a new layout
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::new()
    }

    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &DescriptorBindings {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Default number of sets a pool can hand out
pub const DEFAULT_MAX_SETS: u32 = 1000;

/// Descriptor pool builder
pub struct DescriptorPoolBuilder {
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            pool_sizes: Vec::new(),
            max_sets: DEFAULT_MAX_SETS,
            flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }
}

impl DescriptorPoolBuilder {
    /// Create a builder with [`DEFAULT_MAX_SETS`] and no flags
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` descriptors of `descriptor_type`
    #[must_use]
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    /// Set creation flags, e.g. `FREE_DESCRIPTOR_SET`
    #[must_use]
    pub const fn set_pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the maximum number of sets
    #[must_use]
    pub const fn set_max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Build the pool
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorPool> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(self.flags)
            .max_sets(self.max_sets)
            .pool_sizes(&self.pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;
        log::debug!("Created descriptor pool for {} set(s)", self.max_sets);

        Ok(DescriptorPool {
            pool,
            device: device.clone(),
            max_sets: self.max_sets,
        })
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
    max_sets: u32,
}

impl DescriptorPool {
    /// Start a new pool
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::new()
    }

    /// Allocate one set for `layout`
    ///
    /// Returns `None` when the pool is exhausted or fragmented.
    pub fn allocate_descriptor(&self, layout: &DescriptorSetLayout) -> Option<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets.into_iter().next(),
            Err(result) => {
                log::warn!("Descriptor set allocation failed: {result:?}");
                None
            }
        }
    }

    /// Return sets to the pool; requires `FREE_DESCRIPTOR_SET`
    pub fn free_descriptors(&self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        unsafe { self.device.free_descriptor_sets(self.pool, sets) }.map_err(VulkanError::Api)
    }

    /// Invalidate every set allocated from this pool
    pub fn reset_pool(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(VulkanError::Api)
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Maximum number of sets
    pub const fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingResource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    resource: PendingResource,
}

/// Collects resource writes for one layout and applies them to a set
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<PendingWrite>,
}

impl<'a> DescriptorWriter<'a> {
    /// Create a writer for sets of `layout` allocated from `pool`
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    /// Bind a buffer range to `binding`
    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> VulkanResult<Self> {
        let descriptor_type = self.layout.bindings().single_resource_type(binding)?;
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            resource: PendingResource::Buffer(info),
        });
        Ok(self)
    }

    /// Bind an image to `binding`
    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> VulkanResult<Self> {
        let descriptor_type = self.layout.bindings().single_resource_type(binding)?;
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            resource: PendingResource::Image(info),
        });
        Ok(self)
    }

    /// Allocate a set and write into it; `None` if the pool is exhausted
    pub fn build(self) -> VulkanResult<Option<vk::DescriptorSet>> {
        let Some(set) = self.pool.allocate_descriptor(self.layout) else {
            return Ok(None);
        };
        self.overwrite(set);
        Ok(Some(set))
    }

    /// Write into an existing set
    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.descriptor_type);
                match &write.resource {
                    PendingResource::Buffer(info) => builder.buffer_info(std::slice::from_ref(info)),
                    PendingResource::Image(info) => builder.image_info(std::slice::from_ref(info)),
                }
                .build()
            })
            .collect();

        unsafe {
            self.pool.device.update_descriptor_sets(&writes, &[]);
        }
    }
}
