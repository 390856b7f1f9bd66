//! Integration tests for compute targets, feedback passes and pixel I/O.

use texel_compute::gpu::{
    scatter_map, ComputeProgram, ComputeTarget, GpuContext, ProgramBuilder, TargetError,
    UniformError, Uniforms,
};

const IDENTITY_WGSL: &str = r#"
@group(0) @binding(2) var state: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(state, vec2<i32>(pos.xy), 0);
}
"#;

const INCREMENT_WGSL: &str = r#"
@group(0) @binding(2) var state: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let bytes = vec4<u32>(round(textureLoad(state, vec2<i32>(pos.xy), 0) * 255.0));
    return vec4<f32>((bytes + vec4<u32>(1u)) % vec4<u32>(256u)) / 255.0;
}
"#;

const FILL_WGSL: &str = r#"
struct Params {
    value: vec4<f32>,
}
@group(0) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    return params.value;
}
"#;

async fn create_gpu_context() -> Option<GpuContext> {
    GpuContext::new().await.ok()
}

fn identity(ctx: &GpuContext) -> ComputeProgram {
    ProgramBuilder::fragment("identity", IDENTITY_WGSL)
        .texture("state")
        .build(&ctx.device)
        .expect("Failed to build identity program")
}

fn increment(ctx: &GpuContext) -> ComputeProgram {
    ProgramBuilder::fragment("increment", INCREMENT_WGSL)
        .texture("state")
        .build(&ctx.device)
        .expect("Failed to build increment program")
}

fn pattern(width: u32) -> Vec<u8> {
    (0..width * width * 4).map(|i| (i * 7 % 256) as u8).collect()
}

fn seeded(ctx: &GpuContext, width: u32) -> (ComputeTarget, Vec<u8>) {
    let target = ComputeTarget::new(ctx, width).expect("Failed to create target");
    let data = pattern(width);
    target.push_texture_data(&data).expect("Failed to push data");
    (target, data)
}

#[tokio::test]
async fn test_construction_limits() {
    if let Some(ctx) = create_gpu_context().await {
        assert!(ComputeTarget::new(&ctx, 1).is_ok());
        let large = ComputeTarget::new(&ctx, 4096).expect("4096 should be supported");
        assert_eq!(large.width(), 4096);
        large.dispose();

        for width in [0, 4097, 3] {
            let result = ComputeTarget::new(&ctx, width);
            assert!(
                matches!(result, Err(TargetError::InvalidDimension { .. })),
                "width {} should be rejected",
                width
            );
        }
    }
}

#[tokio::test]
async fn test_push_then_read_round_trip() {
    if let Some(ctx) = create_gpu_context().await {
        let (target, data) = seeded(&ctx, 16);
        let pixels = target.read_pixels().expect("readback failed");
        assert_eq!(pixels, data);
        assert!(!target.has_back_buffer());
    }
}

#[tokio::test]
async fn test_identity_feedback_preserves_contents() {
    if let Some(ctx) = create_gpu_context().await {
        let program = identity(&ctx);
        let (target, data) = seeded(&ctx, 32);

        for pass in 1..=5 {
            target
                .compute(&program, &Uniforms::new().target("state", &target))
                .expect("compute failed");
            assert!(target.has_back_buffer());
            assert_eq!(target.read_pixels().unwrap(), data, "after pass {}", pass);
        }
    }
}

#[tokio::test]
async fn test_increment_feedback_accumulates() {
    if let Some(ctx) = create_gpu_context().await {
        let program = increment(&ctx);
        let (target, data) = seeded(&ctx, 16);

        let passes = 7u32;
        for _ in 0..passes {
            target
                .compute(&program, &Uniforms::new().target("state", &target))
                .expect("compute failed");
        }

        let expected: Vec<u8> = data.iter().map(|&b| b.wrapping_add(passes as u8)).collect();
        assert_eq!(target.read_pixels().unwrap(), expected);
    }
}

#[tokio::test]
async fn test_multiple_self_references_swap_once() {
    if let Some(ctx) = create_gpu_context().await {
        let program = ProgramBuilder::fragment(
            "sum",
            r#"
@group(0) @binding(2) var a: texture_2d<f32>;
@group(0) @binding(3) var b: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = vec2<i32>(pos.xy);
    let bytes = vec4<u32>(round(textureLoad(a, texel, 0) * 255.0))
        + vec4<u32>(round(textureLoad(b, texel, 0) * 255.0));
    return vec4<f32>(bytes % vec4<u32>(256u)) / 255.0;
}
"#,
        )
        .texture("a")
        .texture("b")
        .build(&ctx.device)
        .unwrap();

        let (target, data) = seeded(&ctx, 8);
        let uniforms = Uniforms::new().target("a", &target).target("b", &target);
        target.compute(&program, &uniforms).unwrap();

        // Both inputs see the contents from before the pass.
        let expected: Vec<u8> = data.iter().map(|&b| b.wrapping_add(b)).collect();
        assert_eq!(target.read_pixels().unwrap(), expected);
    }
}

#[tokio::test]
async fn test_reading_another_target_does_not_swap() {
    if let Some(ctx) = create_gpu_context().await {
        let program = identity(&ctx);
        let (source, data) = seeded(&ctx, 8);
        let dest = ComputeTarget::new(&ctx, 8).unwrap();

        dest.compute(&program, &Uniforms::new().target("state", &source))
            .unwrap();

        assert_eq!(dest.read_pixels().unwrap(), data);
        assert!(!dest.has_back_buffer());
        assert!(!source.has_back_buffer());
    }
}

#[tokio::test]
async fn test_numeric_uniforms_and_ignored_names() {
    if let Some(ctx) = create_gpu_context().await {
        let program = ProgramBuilder::fragment("fill", FILL_WGSL)
            .float("value", 4)
            .build(&ctx.device)
            .unwrap();
        let target = ComputeTarget::new(&ctx, 4).unwrap();

        let uniforms = Uniforms::new()
            .float("value", [1.0, 0.0, 128.0 / 255.0, 1.0])
            .scalar("generation", 12.0);
        target.compute(&program, &uniforms).unwrap();

        let pixels = target.read_pixels().unwrap();
        assert!(pixels.chunks_exact(4).all(|p| p == [255, 0, 128, 255]));
    }
}

#[tokio::test]
async fn test_compute_chains() {
    if let Some(ctx) = create_gpu_context().await {
        let program = increment(&ctx);
        let (target, data) = seeded(&ctx, 4);
        let uniforms = Uniforms::new().target("state", &target);

        let pixels = target
            .compute(&program, &uniforms)
            .and_then(|t| t.compute(&program, &uniforms))
            .and_then(|t| t.read_pixels())
            .unwrap();

        let expected: Vec<u8> = data.iter().map(|&b| b.wrapping_add(2)).collect();
        assert_eq!(pixels, expected);
    }
}

#[tokio::test]
async fn test_uniform_errors_leave_target_untouched() {
    if let Some(ctx) = create_gpu_context().await {
        let program = identity(&ctx);
        let (target, data) = seeded(&ctx, 8);

        let result = target.compute(&program, &Uniforms::new());
        assert!(matches!(
            result,
            Err(TargetError::Uniform(UniformError::UnboundTexture(_)))
        ));

        let result = target.compute(&program, &Uniforms::new().scalar("state", 1.0));
        assert!(matches!(
            result,
            Err(TargetError::Uniform(UniformError::TypeMismatch { .. }))
        ));

        assert!(!target.has_back_buffer());
        assert_eq!(target.read_pixels().unwrap(), data);
    }
}

#[tokio::test]
async fn test_dispose_back_buffer_reallocates_transparently() {
    if let Some(ctx) = create_gpu_context().await {
        let program = increment(&ctx);
        let (mut target, data) = seeded(&ctx, 16);

        for _ in 0..3 {
            target
                .compute(&program, &Uniforms::new().target("state", &target))
                .unwrap();
        }
        target.dispose_back_buffer();
        assert!(!target.has_back_buffer());
        let after_dispose = target.read_pixels().unwrap();
        let expected: Vec<u8> = data.iter().map(|&b| b.wrapping_add(3)).collect();
        assert_eq!(after_dispose, expected);

        for _ in 0..2 {
            target
                .compute(&program, &Uniforms::new().target("state", &target))
                .unwrap();
        }
        assert!(target.has_back_buffer());
        let expected: Vec<u8> = data.iter().map(|&b| b.wrapping_add(5)).collect();
        assert_eq!(target.read_pixels().unwrap(), expected);

        // No-op without a back buffer.
        target.dispose_back_buffer();
        target.dispose_back_buffer();
        target.dispose();
    }
}

#[tokio::test]
async fn test_transpose_mirrors_with_scatter_map() {
    if let Some(ctx) = create_gpu_context().await {
        let width = 8u32;
        let (target, data) = seeded(&ctx, width);
        let scatter = ComputeTarget::new(&ctx, width).unwrap();
        scatter
            .push_texture_data(&scatter_map(width, |x, y| (width - 1 - x, y)))
            .unwrap();

        target.transpose(&scatter).unwrap();
        assert!(target.has_back_buffer());

        let pixels = target.read_pixels().unwrap();
        for y in 0..width {
            for x in 0..width {
                let dst = ((y * width + x) * 4) as usize;
                let src = ((y * width + (width - 1 - x)) * 4) as usize;
                assert_eq!(pixels[dst..dst + 4], data[src..src + 4], "texel ({}, {})", x, y);
            }
        }

        // Mirroring twice restores the original.
        target.transpose(&scatter).unwrap();
        assert_eq!(target.read_pixels().unwrap(), data);
    }
}

#[tokio::test]
async fn test_transpose_swaps_axes() {
    if let Some(ctx) = create_gpu_context().await {
        let width = 4u32;
        let (target, data) = seeded(&ctx, width);
        let scatter = ComputeTarget::new(&ctx, width).unwrap();
        scatter
            .push_texture_data(&scatter_map(width, |x, y| (y, x)))
            .unwrap();

        target.transpose(&scatter).unwrap();

        let pixels = target.read_pixels().unwrap();
        for y in 0..width {
            for x in 0..width {
                let dst = ((y * width + x) * 4) as usize;
                let src = ((x * width + y) * 4) as usize;
                assert_eq!(pixels[dst..dst + 4], data[src..src + 4]);
            }
        }
    }
}

#[tokio::test]
async fn test_transpose_dimension_mismatch() {
    if let Some(ctx) = create_gpu_context().await {
        let (target, data) = seeded(&ctx, 8);
        let scatter = ComputeTarget::new(&ctx, 16).unwrap();

        let result = target.transpose(&scatter);
        assert!(matches!(
            result,
            Err(TargetError::DimensionMismatch {
                target: 8,
                scatter: 16
            })
        ));
        assert!(!target.has_back_buffer());
        assert_eq!(target.read_pixels().unwrap(), data);
    }
}

#[tokio::test]
async fn test_push_overflow_and_alignment() {
    if let Some(ctx) = create_gpu_context().await {
        let (target, data) = seeded(&ctx, 4);

        let result = target.push_texture_data(&vec![0u8; 4 * 4 * 4 + 1]);
        assert!(matches!(result, Err(TargetError::Overflow { .. })));

        let result = target.push_texture_data(&[1, 2, 3, 4, 5, 6]);
        assert!(matches!(result, Err(TargetError::Alignment(6))));

        assert_eq!(target.read_pixels().unwrap(), data);
    }
}

#[tokio::test]
async fn test_partial_push_overwrites_leading_texels() {
    if let Some(ctx) = create_gpu_context().await {
        let width = 4u32;
        let target = ComputeTarget::new(&ctx, width).unwrap();
        target.push_texture_data(&vec![0u8; 64]).unwrap();

        // One full row plus two texels of the next.
        let partial: Vec<u8> = (1..=24).collect();
        target.push_texture_data(&partial).unwrap();

        let pixels = target.read_pixels().unwrap();
        assert_eq!(pixels[..24], partial[..]);
        assert!(pixels[24..].iter().all(|&b| b == 0));

        // Shorter than one row.
        target.push_texture_data(&[9, 9, 9, 9]).unwrap();
        let pixels = target.read_pixels().unwrap();
        assert_eq!(pixels[..4], [9, 9, 9, 9]);
        assert_eq!(pixels[4..24], partial[4..]);
    }
}

#[tokio::test]
async fn test_read_some_pixels() {
    if let Some(ctx) = create_gpu_context().await {
        let width = 8u32;
        let (target, data) = seeded(&ctx, width);

        let region = target.read_some_pixels(2, 1, Some(5), Some(4)).unwrap();
        assert_eq!(region.len(), 3 * 3 * 4);
        let mut expected = Vec::new();
        for y in 1..4 {
            let start = ((y * width + 2) * 4) as usize;
            expected.extend_from_slice(&data[start..start + 12]);
        }
        assert_eq!(region, expected);

        // Unset stop coordinates default to the full width.
        let tail = target.read_some_pixels(0, 6, None, None).unwrap();
        assert_eq!(tail, data[(6 * width * 4) as usize..]);

        let result = target.read_some_pixels(4, 0, Some(2), None);
        assert!(matches!(result, Err(TargetError::RegionOutOfBounds { .. })));
        let result = target.read_some_pixels(0, 0, Some(9), None);
        assert!(matches!(result, Err(TargetError::RegionOutOfBounds { .. })));
    }
}

#[tokio::test]
async fn test_read_into_caller_buffers() {
    if let Some(ctx) = create_gpu_context().await {
        let (target, data) = seeded(&ctx, 4);

        let mut output = vec![0u8; data.len() + 8];
        target.read_pixels_into(&mut output).unwrap();
        assert_eq!(output[..data.len()], data[..]);
        assert!(output[data.len()..].iter().all(|&b| b == 0));

        let mut small = vec![0u8; 8];
        let result = target.read_pixels_into(&mut small);
        assert!(matches!(
            result,
            Err(TargetError::BufferTooSmall { needed: 64, got: 8 })
        ));

        let mut row = [0u8; 16];
        target
            .read_some_pixels_into(0, 2, None, Some(3), &mut row)
            .unwrap();
        assert_eq!(row[..], data[32..48]);
    }
}
