//! Texel Compute
//!
//! Texture-backed GPGPU compute targets for wgpu.
//!
//! # Features
//!
//! - Square RGBA8 compute targets (power-of-two widths up to 4096)
//! - Compute passes: a WGSL program evaluated once per texel over a full-screen quad
//! - Feedback passes: a target may read itself; double buffering is allocated
//!   lazily and swapped implicitly
//! - Scatter ("transpose") passes driven by a coordinate map target
//! - Pixel upload and readback, PNG snapshots via `image`
//! - Headless GPU access via wgpu (Metal on macOS, Vulkan/DX12/GL elsewhere)

pub mod gpu;
pub mod snapshot;

// Re-export commonly used types
pub use gpu::{
    ComputeProgram, ComputeTarget, ContextConfig, GpuContext, GpuError, ProgramBuilder,
    ProgramError, TargetError, TargetWidth, Uniform, UniformError, Uniforms,
};
pub use snapshot::{save_png, to_image, SnapshotError};
