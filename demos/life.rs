//! Example: Conway's Game of Life as a feedback compute loop.
//!
//! Each generation reads the previous one from the same target, so the
//! target's back buffer is allocated on the first step and reused after.
//!
//! Run with:
//!     cargo run --example life -- [generations] [snapshot.png]

use anyhow::Context;
use texel_compute::gpu::{ComputeTarget, GpuContext, ProgramBuilder, Uniforms};
use texel_compute::save_png;

const WIDTH: u32 = 64;

const LIFE_WGSL: &str = r#"
@group(0) @binding(2) var state: texture_2d<f32>;

fn alive(p: vec2<i32>) -> u32 {
    let size = vec2<i32>(textureDimensions(state));
    return u32(textureLoad(state, (p + size) % size, 0).r > 0.5);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(pos.xy);
    var neighbours = 0u;
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            if (dx != 0 || dy != 0) {
                neighbours += alive(p + vec2<i32>(dx, dy));
            }
        }
    }
    let live = neighbours == 3u || (neighbours == 2u && alive(p) == 1u);
    return select(vec4<f32>(0.0, 0.0, 0.0, 1.0), vec4<f32>(1.0), live);
}
"#;

/// Glider in the top-left corner, R-pentomino in the middle.
const SEED: &[(u32, u32)] = &[
    (1, 0),
    (2, 1),
    (0, 2),
    (1, 2),
    (2, 2),
    (32, 31),
    (33, 31),
    (31, 32),
    (32, 32),
    (32, 33),
];

fn seed_pixels() -> Vec<u8> {
    let mut pixels = [0u8, 0, 0, 255].repeat((WIDTH * WIDTH) as usize);
    for &(x, y) in SEED {
        let i = ((y * WIDTH + x) * 4) as usize;
        pixels[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
    }
    pixels
}

fn print_board(generation: u32, pixels: &[u8]) {
    let population = pixels.chunks_exact(4).filter(|p| p[0] > 127).count();
    println!("Generation {} ({} alive)", generation, population);
    for row in pixels.chunks_exact((WIDTH * 4) as usize) {
        let line: String = row
            .chunks_exact(4)
            .map(|p| if p[0] > 127 { '#' } else { '.' })
            .collect();
        println!("{}", line);
    }
    println!();
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let generations: u32 = match args.next() {
        Some(arg) => arg.parse().context("generations must be a number")?,
        None => 32,
    };
    let snapshot = args.next();

    let ctx = pollster::block_on(GpuContext::new()).context("GPU initialization failed")?;
    println!("Adapter: {}\n", ctx.adapter_info().name);

    let program = ProgramBuilder::fragment("life", LIFE_WGSL)
        .texture("state")
        .build(&ctx.device)?;

    let mut board = ComputeTarget::new(&ctx, WIDTH)?;
    board.push_texture_data(&seed_pixels())?;
    print_board(0, &board.read_pixels()?);

    for generation in 1..=generations {
        board.compute(&program, &Uniforms::new().target("state", &board))?;
        if generation % 8 == 0 || generation == generations {
            print_board(generation, &board.read_pixels()?);
        }
    }

    if let Some(path) = snapshot {
        save_png(&board, &path)?;
        println!("Saved final generation to {}", path);
    }

    board.dispose_back_buffer();
    board.dispose();
    Ok(())
}
