//! Scatter ("transpose") program and scatter coordinate encoding.
//!
//! A scatter coordinate map is itself a compute target of the same width.
//! Texel `(x, y)` of the map holds the destination of source texel `(x, y)`,
//! as two little-endian 16-bit integers: `dest.x = r + 256 * g`,
//! `dest.y = b + 256 * a`.

use wgpu::Device;

use super::program::{ComputeProgram, ProgramBuilder, ProgramError, Topology};

pub const SCATTER_COORD_UNIFORM: &str = "scatter_coord";
pub const SOURCE_UNIFORM: &str = "source";
pub const TEXTURE_WIDTH_UNIFORM: &str = "texture_width";

const TRANSPOSE_WGSL: &str = include_str!("shaders/transpose.wgsl");

/// Build the fixed scatter program.
///
/// Declaration order fixes the bindings the shader expects: the width at 0,
/// the scatter map at 2 and the source at 3.
pub(crate) fn build_program(device: &Device) -> Result<ComputeProgram, ProgramError> {
    ProgramBuilder::new("transpose", TRANSPOSE_WGSL)
        .int(TEXTURE_WIDTH_UNIFORM, 1)
        .texture(SCATTER_COORD_UNIFORM)
        .texture(SOURCE_UNIFORM)
        .topology(Topology::Points)
        .build(device)
}

/// Encode a destination texel as a scatter map entry.
pub fn encode_scatter_coord(x: u32, y: u32) -> [u8; 4] {
    [
        (x & 0xff) as u8,
        (x >> 8) as u8,
        (y & 0xff) as u8,
        (y >> 8) as u8,
    ]
}

/// Decode a scatter map entry back to its destination texel.
pub fn decode_scatter_coord(texel: [u8; 4]) -> (u32, u32) {
    (
        texel[0] as u32 | (texel[1] as u32) << 8,
        texel[2] as u32 | (texel[3] as u32) << 8,
    )
}

/// Build the bytes of a `width × width` scatter map from a destination function.
///
/// The result can be uploaded with `ComputeTarget::push_texture_data`.
pub fn scatter_map(width: u32, destination: impl Fn(u32, u32) -> (u32, u32)) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((width * width * 4) as usize);
    for y in 0..width {
        for x in 0..width {
            let (dx, dy) = destination(x, y);
            bytes.extend_from_slice(&encode_scatter_coord(dx, dy));
        }
    }
    bytes
}
