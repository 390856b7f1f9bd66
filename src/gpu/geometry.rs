//! Vertex geometry shared by compute and transpose passes.
//!
//! Both layouts feed a single `vec2<f32>` attribute at `@location(0)`:
//! clip-space corners for the full-screen quad, texel coordinates for the
//! per-texel point list.

use wgpu::util::DeviceExt;
use wgpu::{Buffer, Device};

/// A single vertex of either geometry.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
}

const ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

/// Vertex buffer layout every program is compiled against.
pub const VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<Vertex>() as u64,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &ATTRIBUTES,
};

/// Two triangles covering clip space.
pub const QUAD_VERTICES: [Vertex; 6] = [
    Vertex { position: [-1.0, -1.0] },
    Vertex { position: [1.0, -1.0] },
    Vertex { position: [-1.0, 1.0] },
    Vertex { position: [-1.0, 1.0] },
    Vertex { position: [1.0, -1.0] },
    Vertex { position: [1.0, 1.0] },
];

/// One point per texel of a `width × width` surface, row-major.
pub fn texel_points(width: u32) -> Vec<Vertex> {
    (0..width)
        .flat_map(|y| {
            (0..width).map(move |x| Vertex {
                position: [x as f32, y as f32],
            })
        })
        .collect()
}

/// An uploaded vertex buffer and the number of vertices to draw from it.
pub struct Geometry {
    buffer: Buffer,
    vertex_count: u32,
}

impl Geometry {
    /// Full-screen quad used by every compute pass.
    pub fn quad(device: &Device) -> Self {
        Self::upload(device, "quad_vertices", &QUAD_VERTICES)
    }

    /// Per-texel point list used by transpose passes.
    pub fn points(device: &Device, width: u32) -> Self {
        Self::upload(device, "texel_points", &texel_points(width))
    }

    fn upload(device: &Device, label: &str, vertices: &[Vertex]) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            buffer,
            vertex_count: vertices.len() as u32,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}
