//! Vulkan context management
//!
//! Owns the instance, the presentation surface, the selected physical device,
//! the logical device with its queues and the command pool used for one-shot
//! transfers. Everything else in the backend is created through it and must be
//! dropped before it.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::core::config::RendererConfig;
use crate::render::vulkan::buffer::BufferLayout;
use crate::render::vulkan::window::Window;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "Lantern";

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A descriptor set layout declared the same binding twice
    #[error("Binding {binding} is already in use")]
    DuplicateBinding {
        /// The repeated binding index
        binding: u32,
    },

    /// A descriptor write named a binding the layout does not declare
    #[error("Layout does not contain binding {binding}")]
    UnknownBinding {
        /// The undeclared binding index
        binding: u32,
    },

    /// A single-resource write targeted a binding declared as an array
    #[error("Binding {binding} expects {count} descriptors, single-resource writes need exactly 1")]
    BindingCountMismatch {
        /// The binding index
        binding: u32,
        /// Declared descriptor count
        count: u32,
    },

    /// A recreated swap chain changed its image or depth format
    #[error("Swap chain formats changed: image {old_image:?} -> {new_image:?}, depth {old_depth:?} -> {new_depth:?}")]
    IncompatibleSwapChain {
        /// Image format of the predecessor
        old_image: vk::Format,
        /// Image format of the new chain
        new_image: vk::Format,
        /// Depth format of the predecessor
        old_depth: vk::Format,
        /// Depth format of the new chain
        new_depth: vk::Format,
    },

    /// None of the candidate formats supports the requested features
    #[error("No candidate format supports the requested tiling and features")]
    NoSupportedFormat,

    /// Host access to a buffer that is not mapped
    #[error("Buffer memory is not mapped")]
    BufferNotMapped,

    /// Host access outside of the mapped range
    #[error("Access of {size} bytes at offset {offset} exceeds the {capacity} mapped bytes")]
    OutOfBounds {
        /// Start of the access
        offset: u64,
        /// Length of the access
        size: u64,
        /// Bytes available
        capacity: u64,
    },

    /// More point lights than the global uniform block can hold
    #[error("Point light count exceeds the maximum of {max}")]
    LightCapacityExceeded {
        /// Capacity of the light array
        max: usize,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, optionally with the validation layer
    pub fn new(window: &Window, config: &RendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name = c_string(&config.application_name)?;
        let engine_name = c_string(ENGINE_NAME)?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let required_extensions = window
            .get_required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}")))?;
        let extension_names = required_extensions
            .iter()
            .map(|ext| c_string(ext))
            .collect::<VulkanResult<Vec<_>>>()?;
        let mut extensions: Vec<*const std::ffi::c_char> =
            extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let enable_validation =
            config.validation_enabled() && Self::validation_layer_available(&entry)?;
        if config.validation_enabled() && !enable_validation {
            log::warn!("{VALIDATION_LAYER} requested but not installed, continuing without it");
        }

        let layer_names = if enable_validation {
            vec![c_string(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            log::info!("Vulkan validation enabled");
            Some((debug_utils, messenger))
        } else {
            None
        };

        Ok(Self { entry, instance, debug })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .map_err(VulkanError::Api)?;
        Ok(layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_str().map_or(false, |name| name == VALIDATION_LAYER)
        }))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value)
        .map_err(|_| VulkanError::InitializationFailed(format!("Interior nul byte in {value:?}")))
}

/// Presentation surface with its extension loader
struct PresentationSurface {
    loader: Surface,
    handle: vk::SurfaceKHR,
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

/// Queue family indices used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family that supports graphics commands
    pub graphics_family: u32,
    /// Family that can present to the surface
    pub present_family: u32,
}

impl QueueFamilyIndices {
    /// Whether graphics and presentation run on different families
    pub const fn is_split(&self) -> bool {
        self.graphics_family != self.present_family
    }
}

/// Surface capabilities, formats and present modes for the selected device
#[derive(Debug, Clone)]
pub struct SwapChainSupport {
    /// Image count and extent limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapChainSupport {
    /// Query swap chain support of a device for a surface
    pub fn query(
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        loader: &Surface,
    ) -> VulkanResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(device, surface)
                    .map_err(VulkanError::Api)?,
                formats: loader
                    .get_physical_device_surface_formats(device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }

    /// At least one format and one present mode are available
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families used for rendering
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Select the first device able to render and present to `surface`
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };
        log::info!("Found {} Vulkan device(s)", devices.len());

        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", unsafe {
                        CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy()
                    });
                    return Ok(info);
                }
                Err(e) => log::debug!("Skipping device: {e}"),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in (0_u32..).zip(families.iter()) {
            if family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && graphics_family.is_none()
            {
                graphics_family = Some(index);
            }

            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };
            if family.queue_count > 0 && present_support && present_family.is_none() {
                present_family = Some(index);
            }

            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let queue_families = QueueFamilyIndices {
            graphics_family: graphics_family.ok_or_else(|| {
                VulkanError::InitializationFailed("No graphics queue family found".to_string())
            })?,
            present_family: present_family.ok_or_else(|| {
                VulkanError::InitializationFailed("No present queue family found".to_string())
            })?,
        };

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Swapchain extension not supported".to_string(),
            ));
        }

        if !SwapChainSupport::query(device, surface, surface_loader)?.is_adequate() {
            return Err(VulkanError::InitializationFailed(
                "No surface formats or present modes".to_string(),
            ));
        }

        if features.sampler_anisotropy == vk::FALSE {
            return Err(VulkanError::InitializationFailed(
                "Sampler anisotropy not supported".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
            queue_families,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one queue per used family
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical.queue_families;
        let unique_families: HashSet<u32> =
            [families.graphics_family, families.present_family].into_iter().collect();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Find a memory type allowed by `type_filter` that has every requested property
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .zip(0_u32..)
        .find(|&(memory_type, index)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(_, index)| index)
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Pick the first candidate whose format properties carry `features` for `tiling`
///
/// `query` returns the format properties of one candidate; the context passes
/// the physical-device query, tests pass a table.
pub fn choose_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    query: impl Fn(vk::Format) -> vk::FormatProperties,
) -> VulkanResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties = query(format);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or(VulkanError::NoSupportedFormat)
}

/// Bind `memory` to `handle`; when binding fails both are released before the error returns
pub fn bind_or_release<H: Copy>(
    handle: H,
    memory: vk::DeviceMemory,
    bind: impl FnOnce(H, vk::DeviceMemory) -> Result<(), vk::Result>,
    release: impl FnOnce(H, vk::DeviceMemory),
) -> VulkanResult<(H, vk::DeviceMemory)> {
    match bind(handle, memory) {
        Ok(()) => Ok((handle, memory)),
        Err(e) => {
            release(handle, memory);
            Err(VulkanError::Api(e))
        }
    }
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Teardown runs command pool, device, surface, debug messenger, instance.
pub struct VulkanContext {
    depth_format: vk::Format,
    command_pool: vk::CommandPool,
    device: LogicalDevice,
    surface: PresentationSurface,
    physical_device: PhysicalDeviceInfo,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a new Vulkan context for the window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, config)?;

        let loader = Surface::new(&instance.entry, &instance.instance);
        let handle = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {e}")))?;
        let surface = PresentationSurface { loader, handle };

        let physical_device =
            PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface.handle, &surface.loader)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(physical_device.queue_families.graphics_family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut context = Self {
            depth_format: vk::Format::UNDEFINED,
            command_pool,
            device,
            surface,
            physical_device,
            instance,
        };
        context.depth_format = context.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        log::info!("Depth format: {:?}", context.depth_format);
        Ok(context)
    }

    /// Get the raw Device handle
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the surface handle
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.handle
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the command pool
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Graphics and present queue families
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.physical_device.queue_families
    }

    /// Current surface capabilities, formats and present modes
    pub fn swap_chain_support(&self) -> VulkanResult<SwapChainSupport> {
        SwapChainSupport::query(self.physical_device.device, self.surface.handle, &self.surface.loader)
    }

    /// Minimum offset alignment for dynamic and per-slot uniform buffer ranges
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.physical_device.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Depth attachment format shared by every swap chain of this device
    pub const fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Granularity of flush and invalidate ranges on non-coherent memory
    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.physical_device.properties.limits.non_coherent_atom_size
    }

    /// Stride alignment for a per-slot uniform buffer in host-visible memory
    pub fn uniform_slot_alignment(&self) -> vk::DeviceSize {
        BufferLayout::mapped_slot_alignment(
            self.min_uniform_buffer_offset_alignment(),
            self.non_coherent_atom_size(),
        )
    }

    /// Find a memory type on this device
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<u32> {
        find_memory_type(&self.physical_device.memory_properties, type_filter, properties)
    }

    /// Pick the first candidate this device supports for `tiling` and `features`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        choose_supported_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device.device, format)
        })
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<(vk::Buffer, vk::DeviceMemory)> {
        let device = self.device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = self
            .find_memory_type(requirements.memory_type_bits, properties)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let (buffer, memory) = bind_or_release(
            buffer,
            memory,
            |buffer, memory| unsafe { device.bind_buffer_memory(buffer, memory, 0) },
            |buffer, memory| unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            },
        )?;

        log::debug!("Created buffer of {size} bytes ({usage:?})");
        Ok((buffer, memory))
    }

    /// Create an image from `image_info` and bind freshly allocated memory to it
    pub fn create_image_with_info(
        &self,
        image_info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<(vk::Image, vk::DeviceMemory)> {
        let device = self.device();
        let image = unsafe { device.create_image(image_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = self
            .find_memory_type(requirements.memory_type_bits, properties)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        bind_or_release(
            image,
            memory,
            |image, memory| unsafe { device.bind_image_memory(image, memory, 0) },
            |image, memory| unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            },
        )
    }

    /// Allocate and begin a one-shot primary command buffer
    pub fn begin_single_time_commands(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = unsafe {
            self.device()
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        }
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Command buffer allocation returned nothing".to_string(),
        })?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(command_buffer)
    }

    /// End, submit and wait for a command buffer from [`Self::begin_single_time_commands`], then free it
    pub fn end_single_time_commands(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let device = self.device();
        let buffers = [command_buffer];
        let result = unsafe {
            device.end_command_buffer(command_buffer).and_then(|()| {
                let submit_info = vk::SubmitInfo::builder().command_buffers(&buffers).build();
                device.queue_submit(self.graphics_queue(), &[submit_info], vk::Fence::null())?;
                device.queue_wait_idle(self.graphics_queue())
            })
        };

        unsafe { device.free_command_buffers(self.command_pool, &buffers) };
        result.map_err(VulkanError::Api)
    }

    /// Copy `size` bytes between two buffers and wait for completion
    pub fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        let region = vk::BufferCopy::builder().src_offset(0).dst_offset(0).size(size).build();
        unsafe {
            self.device().cmd_copy_buffer(command_buffer, src, dst, &[region]);
        }
        self.end_single_time_commands(command_buffer)
    }

    /// Copy tightly packed pixel data into an image in `TRANSFER_DST_OPTIMAL` layout
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
        layer_count: u32,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D { width, height, depth: 1 })
            .build();
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.end_single_time_commands(command_buffer)
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
        log::debug!("Vulkan context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        properties.memory_type_count = flags.len() as u32;
        properties
    }

    #[test]
    fn test_find_memory_type_requires_all_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&properties, 0b111, wanted).unwrap(), 2);
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
    }

    #[test]
    fn test_find_memory_type_respects_type_filter() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(
            find_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
        assert!(matches!(
            find_memory_type(&properties, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_choose_supported_format_returns_first_match() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let query = |format: vk::Format| {
            let mut properties = vk::FormatProperties::default();
            if format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT {
                properties.optimal_tiling_features = depth;
            }
            properties
        };

        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let format =
            choose_supported_format(&candidates, vk::ImageTiling::OPTIMAL, depth, query).unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn test_choose_supported_format_checks_tiling() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let optimal_only = |_: vk::Format| vk::FormatProperties {
            optimal_tiling_features: depth,
            ..Default::default()
        };

        let result = choose_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            depth,
            optimal_only,
        );
        assert!(matches!(result, Err(VulkanError::NoSupportedFormat)));
    }

    fn choose_depth_format(
        query: impl Fn(vk::Format) -> vk::FormatProperties,
    ) -> VulkanResult<vk::Format> {
        choose_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        )
    }

    #[test]
    fn test_depth_format_prefers_plain_d32() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let everything = |_: vk::Format| vk::FormatProperties {
            optimal_tiling_features: depth,
            ..Default::default()
        };
        assert_eq!(choose_depth_format(everything).unwrap(), vk::Format::D32_SFLOAT);

        let packed_only = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                depth
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        };
        assert_eq!(choose_depth_format(packed_only).unwrap(), vk::Format::D24_UNORM_S8_UINT);
        assert!(matches!(
            choose_depth_format(|_| vk::FormatProperties::default()),
            Err(VulkanError::NoSupportedFormat)
        ));
    }

    #[test]
    fn test_failed_bind_releases_handle_and_memory() {
        use ash::vk::Handle;
        use std::cell::RefCell;

        let buffer = vk::Buffer::from_raw(7);
        let memory = vk::DeviceMemory::from_raw(9);
        let released = RefCell::new(Vec::new());

        let result = bind_or_release(
            buffer,
            memory,
            |_, _| Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            |buffer, memory| released.borrow_mut().push((buffer, memory)),
        );

        assert!(matches!(
            result,
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(*released.borrow(), vec![(buffer, memory)]);
    }

    #[test]
    fn test_successful_bind_keeps_handle_and_memory() {
        use ash::vk::Handle;

        let image = vk::Image::from_raw(3);
        let memory = vk::DeviceMemory::from_raw(4);
        let mut released = false;

        let bound = bind_or_release(image, memory, |_, _| Ok(()), |_, _| released = true).unwrap();

        assert_eq!(bound, (image, memory));
        assert!(!released);
    }

    #[test]
    fn test_split_queue_families() {
        let same = QueueFamilyIndices { graphics_family: 0, present_family: 0 };
        let split = QueueFamilyIndices { graphics_family: 0, present_family: 1 };
        assert!(!same.is_split());
        assert!(split.is_split());
    }
}
