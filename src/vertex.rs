//! Vertices and indices to be passed on to the GPU in vertex and index buffers.

use std::mem::size_of;

use ash::vk;

/// The type of a single index in an index buffer.
pub type Index = u16;

/// The Vulkan equivalent of [`Index`].
pub const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;

/// A homogeneous position and an RGBA color, as laid out for the vertex shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

impl Vertex {
    /// Create a new vertex with an associated color.
    pub const fn new(position: [f32; 4], color: [f32; 4]) -> Self {
        Self { position, color }
    }

    /// Return a descriptor telling Vulkan the number of bytes between data
    /// entries and whether to move to the next data entry after each vertex
    /// or after each instance.
    pub const fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Return Vulkan attribute descriptions specifying how to access each
    /// part of a vertex.
    pub const fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        let position = vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 0,
        };

        let color = vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: size_of::<[f32; 4]>() as u32,
        };

        [position, color]
    }
}

/// A single triangle with red, green and blue corners.
pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new([0.0, 0.5, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]),
    Vertex::new([-0.5, -0.5, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]),
    Vertex::new([0.5, -0.5, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]),
];

/// The corners of a 2x2x2 cube centered on the origin. Each corner's color is
/// its position mapped from `[-1, 1]` onto `[0, 1]`.
pub const CUBE_VERTICES: [Vertex; 8] = [
    Vertex::new([-1.0, 1.0, 1.0, 1.0], [0.0, 1.0, 1.0, 1.0]),
    Vertex::new([-1.0, -1.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0]),
    Vertex::new([1.0, -1.0, 1.0, 1.0], [1.0, 0.0, 1.0, 1.0]),
    Vertex::new([1.0, 1.0, 1.0, 1.0], [1.0, 1.0, 1.0, 1.0]),
    Vertex::new([-1.0, 1.0, -1.0, 1.0], [0.0, 1.0, 0.0, 1.0]),
    Vertex::new([-1.0, -1.0, -1.0, 1.0], [0.0, 0.0, 0.0, 1.0]),
    Vertex::new([1.0, -1.0, -1.0, 1.0], [1.0, 0.0, 0.0, 1.0]),
    Vertex::new([1.0, 1.0, -1.0, 1.0], [1.0, 1.0, 0.0, 1.0]),
];

/// Two counter-clockwise triangles per face of [`CUBE_VERTICES`].
#[rustfmt::skip]
pub const CUBE_INDICES: [Index; 36] = [
    3, 2, 6, 6, 7, 3, // +x
    4, 5, 1, 1, 0, 4, // -x
    4, 0, 3, 3, 7, 4, // +y
    1, 5, 6, 6, 2, 1, // -y
    0, 1, 2, 2, 3, 0, // +z
    7, 6, 5, 5, 4, 7, // -z
];

/// Static geometry for one draw call.
#[derive(Copy, Clone, Debug)]
pub struct Mesh {
    pub vertices: &'static [Vertex],
    /// Drawn with an indexed draw call if present.
    pub indices: Option<&'static [Index]>,
}

impl Mesh {
    pub const TRIANGLE: Mesh = Mesh {
        vertices: &TRIANGLE_VERTICES,
        indices: None,
    };

    pub const CUBE: Mesh = Mesh {
        vertices: &CUBE_VERTICES,
        indices: Some(&CUBE_INDICES),
    };

    /// Number of vertices the draw call consumes: the index count for
    /// indexed meshes, otherwise the vertex count.
    pub fn draw_count(&self) -> u32 {
        self.indices.map_or(self.vertices.len(), <[Index]>::len) as u32
    }
}
