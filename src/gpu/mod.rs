//! GPU compute targets using wgpu.
//!
//! Provides headless texture-backed compute: programs run as full-screen
//! render passes over square RGBA8 surfaces, and targets feed back into
//! themselves through transparent double buffering.

pub mod context;
pub mod geometry;
pub mod layouts;
pub mod program;
pub mod target;
pub mod textures;
pub mod transpose;
pub mod uniforms;

pub use context::{BackendChoice, ContextConfig, GpuContext, GpuError, PowerChoice};
pub use program::{ComputeProgram, ProgramBuilder, ProgramError, Topology, QUAD_VERTEX_WGSL};
pub use target::{ComputeTarget, TargetError, TargetWidth, MAX_WIDTH};
pub use transpose::{decode_scatter_coord, encode_scatter_coord, scatter_map};
pub use uniforms::{Uniform, UniformError, UniformKind, UniformLayout, Uniforms};
