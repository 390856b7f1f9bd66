//! Compiled compute programs.
//!
//! A program is a WGSL module with `vs_main` and `fs_main` entry points that
//! renders into an `Rgba8Unorm` surface. Bind group 0 is laid out from the
//! declared uniforms:
//!
//! - binding 0: uniform block with every numeric uniform, one 16-byte slot each
//!   in declaration order (only present if numeric uniforms are declared)
//! - binding 1: nearest-neighbour, clamp-to-edge sampler (only present if
//!   texture uniforms are declared)
//! - binding 2..: one `texture_2d<f32>` per texture uniform, in declaration order
//!
//! Vertex input is a single `vec2<f32>` at `@location(0)`. Fragment stages
//! usually address texels exactly with `textureLoad(tex, vec2<i32>(pos.xy), 0)`.

use wgpu::{BindGroup, BindGroupLayout, Buffer, Device, Queue, RenderPipeline, Sampler, TextureView};

use super::geometry::VERTEX_LAYOUT;
use super::layouts::BindGroupLayoutBuilder;
use super::textures::COMPUTE_FORMAT;
use super::uniforms::{
    UniformKind, UniformLayout, FIRST_TEXTURE_BINDING, PARAMS_BINDING, SAMPLER_BINDING,
};

/// Pass-through vertex stage for full-screen quad programs.
pub const QUAD_VERTEX_WGSL: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
"#;

/// Errors that can occur while building a program.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("Uniform '{0}' is declared more than once")]
    DuplicateUniform(String),
    #[error("Uniform '{name}' must have 1 to 4 components, got {components}")]
    InvalidComponents { name: String, components: u32 },
}

/// Primitive topology a program is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// Triangle list, used with the full-screen quad.
    #[default]
    Triangles,
    /// Point list, one point per texel.
    Points,
}

impl Topology {
    fn primitive(self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
            Topology::Points => wgpu::PrimitiveTopology::PointList,
        }
    }
}

/// Builder for [`ComputeProgram`].
pub struct ProgramBuilder {
    label: String,
    source: String,
    topology: Topology,
    uniforms: Vec<(String, UniformKind)>,
}

impl ProgramBuilder {
    /// Start from a complete WGSL module.
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            topology: Topology::Triangles,
            uniforms: Vec::new(),
        }
    }

    /// Start from a fragment stage only; [`QUAD_VERTEX_WGSL`] is prepended.
    pub fn fragment(label: impl Into<String>, fragment_source: &str) -> Self {
        Self::new(label, format!("{}{}", QUAD_VERTEX_WGSL, fragment_source))
    }

    /// Declare a texture uniform.
    pub fn texture(mut self, name: impl Into<String>) -> Self {
        self.uniforms.push((name.into(), UniformKind::Texture));
        self
    }

    /// Declare an `f32` / `vecN<f32>` uniform.
    pub fn float(mut self, name: impl Into<String>, components: u32) -> Self {
        self.uniforms.push((name.into(), UniformKind::Float(components)));
        self
    }

    /// Declare an `i32` / `vecN<i32>` uniform.
    pub fn int(mut self, name: impl Into<String>, components: u32) -> Self {
        self.uniforms.push((name.into(), UniformKind::Int(components)));
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Compile the program.
    pub fn build(self, device: &Device) -> Result<ComputeProgram, ProgramError> {
        let layout = UniformLayout::new(self.uniforms)?;

        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
        let mut entries = BindGroupLayoutBuilder::new("compute_program_bind_group_layout");
        if layout.params_len() > 0 {
            entries = entries.uniform(PARAMS_BINDING, visibility);
        }
        if layout.texture_count() > 0 {
            entries = entries.nearest_sampler(SAMPLER_BINDING, visibility);
            for i in 0..layout.texture_count() {
                entries = entries.texture_2d(FIRST_TEXTURE_BINDING + i, visibility);
            }
        }
        let bind_group_layout = entries.build(device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(self.source.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{}_pipeline_layout", self.label)),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{}_pipeline", self.label)),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[VERTEX_LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COMPUTE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: self.topology.primitive(),
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let params_buffer = (layout.params_len() > 0).then(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{}_params", self.label)),
                size: layout.params_len() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        log::debug!(
            "Built program '{}' with {} texture(s) and {} parameter byte(s)",
            self.label,
            layout.texture_count(),
            layout.params_len()
        );

        Ok(ComputeProgram {
            label: self.label,
            pipeline,
            bind_group_layout,
            layout,
            params_buffer,
            topology: self.topology,
        })
    }
}

/// A compiled program plus its declared uniform layout.
pub struct ComputeProgram {
    label: String,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    layout: UniformLayout,
    params_buffer: Option<Buffer>,
    topology: Topology,
}

impl ComputeProgram {
    pub fn builder(label: impl Into<String>, source: impl Into<String>) -> ProgramBuilder {
        ProgramBuilder::new(label, source)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The declared uniforms.
    pub fn uniforms(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub(crate) fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    /// Upload `params` and bind them with the sampler and resolved textures.
    ///
    /// The parameter write lands before the next queue submission, so every
    /// pass must be submitted before the program is bound again.
    pub(crate) fn bind_group(
        &self,
        device: &Device,
        queue: &Queue,
        sampler: &Sampler,
        params: &[u8],
        textures: &[(u32, TextureView)],
    ) -> BindGroup {
        let mut entries = Vec::with_capacity(textures.len() + 2);

        if let Some(buffer) = &self.params_buffer {
            queue.write_buffer(buffer, 0, params);
            entries.push(wgpu::BindGroupEntry {
                binding: PARAMS_BINDING,
                resource: buffer.as_entire_binding(),
            });
        }
        if !textures.is_empty() {
            entries.push(wgpu::BindGroupEntry {
                binding: SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        for (binding, view) in textures {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}_bind_group", self.label)),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }
}
