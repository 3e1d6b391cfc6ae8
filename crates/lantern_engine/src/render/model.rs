//! Meshes on the GPU
//!
//! [`MeshData`] is plain CPU-side geometry. [`Model`] uploads it once into
//! device-local vertex and index buffers through a host-visible staging
//! buffer, and is shared between game objects by reference counting.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};
use std::path::Path;

use crate::assets::obj_loader::{ObjError, ObjLoader};
use crate::render::vulkan::{Buffer, VulkanContext, VulkanError, VulkanResult};

/// Vertex layout shared by every mesh and the geometry shaders
///
/// Locations: 0 position, 1 color, 2 normal, 3 uv.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Vertex color
    pub color: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
}

impl Vertex {
    /// One interleaved binding at slot 0
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Attributes for locations 0 to 3
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, color)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(Self, uv)),
        ]
    }

    /// Bit-exact key, equal for vertices that should share an index
    pub fn dedup_key(&self) -> [u32; 11] {
        let mut key = [0; 11];
        let floats = self
            .position
            .iter()
            .chain(&self.color)
            .chain(&self.normal)
            .chain(&self.uv);
        for (slot, value) in key.iter_mut().zip(floats) {
            *slot = value.to_bits();
        }
        key
    }
}

/// CPU-side geometry; an empty index list means non-indexed drawing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices into `vertices`
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Wrap existing geometry
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Load a Wavefront OBJ file
    pub fn from_obj_file(path: impl AsRef<Path>) -> Result<Self, ObjError> {
        ObjLoader::load_obj(path)
    }

    /// Whether draws go through an index buffer
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// Check that the mesh can be uploaded
    pub fn validate(&self) -> VulkanResult<()> {
        if self.vertices.len() < 3 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Mesh needs at least 3 vertices, got {}", self.vertices.len()),
            });
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&index| index as usize >= self.vertices.len())
        {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Index {index} is past the end of {} vertices",
                    self.vertices.len()
                ),
            });
        }
        Ok(())
    }
}

fn element_count(len: usize) -> VulkanResult<u32> {
    u32::try_from(len).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("{len} elements do not fit a 32-bit count"),
    })
}

/// Upload `data` into a new device-local buffer with `usage`
fn upload_device_local<T: Pod>(
    context: &VulkanContext,
    data: &[T],
    usage: vk::BufferUsageFlags,
) -> VulkanResult<Buffer> {
    let instance_size = size_of::<T>() as vk::DeviceSize;
    let count = element_count(data.len())?;

    let mut staging = Buffer::new(
        context,
        instance_size,
        count,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        0,
    )?;
    staging.map_all()?;
    staging.write_to_buffer(bytemuck::cast_slice(data), vk::WHOLE_SIZE, 0)?;
    staging.unmap();

    let buffer = Buffer::new(
        context,
        instance_size,
        count,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        0,
    )?;
    context.copy_buffer(staging.handle(), buffer.handle(), staging.buffer_size())?;

    Ok(buffer)
}

/// Mesh resident in device-local memory
pub struct Model {
    device: Device,
    vertex_buffer: Buffer,
    vertex_count: u32,
    index_buffer: Option<Buffer>,
    index_count: u32,
}

impl Model {
    /// Upload `mesh`
    pub fn new(context: &VulkanContext, mesh: &MeshData) -> VulkanResult<Self> {
        mesh.validate()?;

        let vertex_buffer =
            upload_device_local(context, &mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = if mesh.is_indexed() {
            Some(upload_device_local(
                context,
                &mesh.indices,
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?)
        } else {
            None
        };

        log::debug!(
            "Uploaded model: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(Self {
            device: context.device().clone(),
            vertex_buffer,
            vertex_count: element_count(mesh.vertices.len())?,
            index_buffer,
            index_count: element_count(mesh.indices.len())?,
        })
    }

    /// Bind vertex and, if present, index buffers
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[self.vertex_buffer.handle()],
                &[0],
            );
            if let Some(index_buffer) = &self.index_buffer {
                self.device.cmd_bind_index_buffer(
                    command_buffer,
                    index_buffer.handle(),
                    0,
                    vk::IndexType::UINT32,
                );
            }
        }
    }

    /// Draw the whole mesh, indexed when an index buffer exists
    pub fn draw(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            if self.index_buffer.is_some() {
                self.device
                    .cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
            } else {
                self.device.cmd_draw(command_buffer, self.vertex_count, 1, 0, 0);
            }
        }
    }

    /// Number of vertices
    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices, 0 for non-indexed meshes
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .finish()
    }
}
