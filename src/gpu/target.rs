//! Texture-backed compute targets.
//!
//! A [`ComputeTarget`] is a square RGBA8 surface that compute passes draw
//! into and later passes read from. When a pass reads the target it is
//! drawing into (a feedback pass), the target transparently switches to a
//! second surface: the previous contents become the pass input and the
//! other surface becomes the draw target, so no draw ever reads and writes
//! the same texture. The second surface is only allocated the first time
//! this happens.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use wgpu::{Device, Queue, TextureView};

use super::context::{GpuContext, SharedResources};
use super::geometry::Geometry;
use super::program::ComputeProgram;
use super::textures::{ReadbackBuffer, Surface, BYTES_PER_TEXEL};
use super::transpose::{SCATTER_COORD_UNIFORM, SOURCE_UNIFORM, TEXTURE_WIDTH_UNIFORM};
use super::uniforms::{UniformError, UniformPlan, Uniforms};

/// Largest supported target width.
pub const MAX_WIDTH: u32 = 4096;

/// Errors that can occur while using a compute target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("ComputeTarget width of '{width}' {reason}")]
    InvalidDimension { width: f64, reason: &'static str },
    #[error("scatter coordinate width '{scatter}' != target width '{target}'")]
    DimensionMismatch { target: u32, scatter: u32 },
    #[error("array length of '{len}' overflows '{capacity}'")]
    Overflow { len: usize, capacity: usize },
    #[error("array length of '{0}' is not a multiple of four")]
    Alignment(usize),
    #[error("unable to create {0}")]
    ResourceCreation(String),
    #[error("region [{x0}, {x1}) x [{y0}, {y1}) is empty or outside the {width}x{width} target")]
    RegionOutOfBounds {
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
        width: u32,
    },
    #[error("output buffer holds {got} bytes but {needed} are required")]
    BufferTooSmall { needed: usize, got: usize },
    #[error("GPU buffer mapping failed: {0}")]
    BufferMapFailed(String),
    #[error(transparent)]
    Uniform(#[from] UniformError),
}

/// A validated target width: a power of two in `1..=4096`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetWidth(u32);

impl TargetWidth {
    pub fn new(width: u32) -> Result<Self, TargetError> {
        if !(1..=MAX_WIDTH).contains(&width) {
            return Err(TargetError::InvalidDimension {
                width: width as f64,
                reason: "is out of range (1 to 4096)",
            });
        }
        if !width.is_power_of_two() {
            return Err(TargetError::InvalidDimension {
                width: width as f64,
                reason: "is not a power of two",
            });
        }
        Ok(Self(width))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn texel_count(self) -> usize {
        self.0 as usize * self.0 as usize
    }

    /// Bytes of a full RGBA8 surface of this width.
    pub fn byte_len(self) -> usize {
        self.texel_count() * BYTES_PER_TEXEL as usize
    }
}

impl TryFrom<u32> for TargetWidth {
    type Error = TargetError;

    fn try_from(width: u32) -> Result<Self, Self::Error> {
        Self::new(width)
    }
}

impl TryFrom<f64> for TargetWidth {
    type Error = TargetError;

    fn try_from(width: f64) -> Result<Self, Self::Error> {
        if !width.is_finite() || width.fract() != 0.0 {
            return Err(TargetError::InvalidDimension {
                width,
                reason: "is not an integer",
            });
        }
        if !(1.0..=MAX_WIDTH as f64).contains(&width) {
            return Err(TargetError::InvalidDimension {
                width,
                reason: "is out of range (1 to 4096)",
            });
        }
        Self::new(width as u32)
    }
}

impl fmt::Display for TargetWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}x{0}", self.0)
    }
}

/// Two surface slots and the index of the one currently drawn into.
///
/// The active slot is always occupied. The other slot is filled on the
/// first swap and can be emptied again with [`SurfaceSlots::take_back`].
struct SurfaceSlots<T> {
    slots: [Option<T>; 2],
    active: usize,
}

impl<T> SurfaceSlots<T> {
    fn new(front: T) -> Self {
        Self {
            slots: [Some(front), None],
            active: 0,
        }
    }

    fn front(&self) -> &T {
        self.slots[self.active]
            .as_ref()
            .expect("active surface slot is always occupied")
    }

    fn back(&self) -> Option<&T> {
        self.slots[1 - self.active].as_ref()
    }

    /// Make the back slot the active one, filling it first if it is empty.
    ///
    /// Returns the new back (the previous front) and whether a surface was
    /// allocated. A failed allocation leaves the active slot unchanged.
    fn swap<E>(&mut self, allocate: impl FnOnce() -> Result<T, E>) -> Result<(&T, bool), E> {
        let next = 1 - self.active;
        let allocated = self.slots[next].is_none();
        if allocated {
            self.slots[next] = Some(allocate()?);
        }
        self.active = next;
        Ok((
            self.back().expect("previous front stays occupied after a swap"),
            allocated,
        ))
    }

    fn take_back(&mut self) -> Option<T> {
        self.slots[1 - self.active].take()
    }

    fn into_occupied(self) -> impl Iterator<Item = T> {
        self.slots.into_iter().flatten()
    }
}

/// Half-open texel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRegion {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl PixelRegion {
    fn full(width: TargetWidth) -> Self {
        Self {
            x: 0,
            y: 0,
            width: width.get(),
            height: width.get(),
        }
    }

    fn bounded(
        target: TargetWidth,
        x0: u32,
        y0: u32,
        x1: Option<u32>,
        y1: Option<u32>,
    ) -> Result<Self, TargetError> {
        let width = target.get();
        let x1 = x1.unwrap_or(width);
        let y1 = y1.unwrap_or(width);
        if x0 >= x1 || y0 >= y1 || x1 > width || y1 > width {
            return Err(TargetError::RegionOutOfBounds {
                x0,
                y0,
                x1,
                y1,
                width,
            });
        }
        Ok(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_TEXEL as usize
    }
}

/// How a pushed byte slice maps onto the surface: complete rows from the
/// top, then a partial row starting at the left edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PushLayout {
    full_rows: u32,
    tail_texels: u32,
}

impl PushLayout {
    fn for_len(width: TargetWidth, len: usize) -> Result<Self, TargetError> {
        let capacity = width.byte_len();
        if len > capacity {
            return Err(TargetError::Overflow { len, capacity });
        }
        if len % BYTES_PER_TEXEL as usize != 0 {
            return Err(TargetError::Alignment(len));
        }
        let texels = (len / BYTES_PER_TEXEL as usize) as u32;
        Ok(Self {
            full_rows: texels / width.get(),
            tail_texels: texels % width.get(),
        })
    }
}

/// A square RGBA8 compute surface with transparent feedback double buffering.
///
/// Methods take `&self` so a target can be passed as a uniform to its own
/// passes. The type is not `Sync`; concurrent use must be serialized by the
/// caller.
pub struct ComputeTarget {
    width: TargetWidth,
    device: Arc<Device>,
    queue: Arc<Queue>,
    resources: Arc<SharedResources>,
    surfaces: RefCell<SurfaceSlots<Surface>>,
}

impl ComputeTarget {
    /// Create a `width × width` target.
    ///
    /// Fails before touching the GPU if `width` is not a power of two in
    /// `1..=4096`, or if the device cannot hold a texture that large.
    pub fn new(ctx: &GpuContext, width: u32) -> Result<Self, TargetError> {
        Self::with_width(ctx, TargetWidth::new(width)?)
    }

    pub fn with_width(ctx: &GpuContext, width: TargetWidth) -> Result<Self, TargetError> {
        let limit = ctx.max_target_width();
        if width.get() > limit {
            return Err(TargetError::ResourceCreation(format!(
                "{} texture: device limit is {}",
                width, limit
            )));
        }

        let front = Surface::for_compute(&ctx.device, "compute_target_a", width.get())?;
        log::debug!("Allocated {} compute target", width);

        Ok(Self {
            width,
            device: ctx.device.clone(),
            queue: ctx.queue.clone(),
            resources: ctx.resources.clone(),
            surfaces: RefCell::new(SurfaceSlots::new(front)),
        })
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn target_width(&self) -> TargetWidth {
        self.width
    }

    /// Whether the second surface is currently allocated.
    pub fn has_back_buffer(&self) -> bool {
        self.surfaces.borrow().back().is_some()
    }

    /// Run `program` over every texel of this target.
    ///
    /// Any uniform that references this target reads its contents from before
    /// the pass; the pass itself draws into the other surface.
    pub fn compute(
        &self,
        program: &ComputeProgram,
        uniforms: &Uniforms<'_>,
    ) -> Result<&Self, TargetError> {
        let plan = program.uniforms().plan(uniforms)?;
        let textures = self.resolve(&plan)?;
        self.draw(
            program,
            &plan,
            &textures,
            &self.resources.quad,
            wgpu::LoadOp::Load,
            "compute_pass",
        );
        Ok(self)
    }

    /// Move every texel to the destination stored at the same texel of `scatter`.
    ///
    /// Texels no source lands on become transparent zero.
    pub fn transpose(&self, scatter: &ComputeTarget) -> Result<&Self, TargetError> {
        if scatter.width != self.width {
            return Err(TargetError::DimensionMismatch {
                target: self.width(),
                scatter: scatter.width(),
            });
        }

        let uniforms = Uniforms::new()
            .target(SCATTER_COORD_UNIFORM, scatter)
            .target(SOURCE_UNIFORM, self)
            .int(TEXTURE_WIDTH_UNIFORM, [self.width() as i32]);

        let program = &self.resources.transpose;
        let plan = program.uniforms().plan(&uniforms)?;
        let textures = self.resolve(&plan)?;
        let points = self.resources.points(&self.device, self.width());
        self.draw(
            program,
            &plan,
            &textures,
            &points,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            "transpose_pass",
        );
        Ok(self)
    }

    /// Read back the whole target, rows top to bottom.
    pub fn read_pixels(&self) -> Result<Vec<u8>, TargetError> {
        self.read_region(PixelRegion::full(self.width))
    }

    /// Read back the whole target into `output`.
    pub fn read_pixels_into(&self, output: &mut [u8]) -> Result<(), TargetError> {
        Self::fill(output, PixelRegion::full(self.width), |region| {
            self.read_region(region)
        })
    }

    /// Read back the texels in `[x0, x1) × [y0, y1)`; `x1` and `y1` default to the width.
    pub fn read_some_pixels(
        &self,
        x0: u32,
        y0: u32,
        x1: Option<u32>,
        y1: Option<u32>,
    ) -> Result<Vec<u8>, TargetError> {
        self.read_region(PixelRegion::bounded(self.width, x0, y0, x1, y1)?)
    }

    /// Like [`ComputeTarget::read_some_pixels`], writing into `output`.
    pub fn read_some_pixels_into(
        &self,
        x0: u32,
        y0: u32,
        x1: Option<u32>,
        y1: Option<u32>,
        output: &mut [u8],
    ) -> Result<(), TargetError> {
        let region = PixelRegion::bounded(self.width, x0, y0, x1, y1)?;
        Self::fill(output, region, |region| self.read_region(region))
    }

    /// Upload RGBA8 texels into the current surface.
    ///
    /// A full-size slice replaces every texel. A shorter one overwrites the
    /// leading texels in row-major order and leaves the rest untouched.
    pub fn push_texture_data(&self, bytes: &[u8]) -> Result<&Self, TargetError> {
        let layout = PushLayout::for_len(self.width, bytes.len())?;
        let row_bytes = self.width() * BYTES_PER_TEXEL;
        let surfaces = self.surfaces.borrow();
        let texture = surfaces.front().texture();

        let split = (layout.full_rows * row_bytes) as usize;
        if layout.full_rows > 0 {
            self.write_rows(texture, &bytes[..split], 0, self.width(), layout.full_rows);
        }
        if layout.tail_texels > 0 {
            self.write_rows(texture, &bytes[split..], layout.full_rows, layout.tail_texels, 1);
        }
        Ok(self)
    }

    /// Release both surfaces.
    pub fn dispose(self) {
        let width = self.width;
        for surface in self.surfaces.into_inner().into_occupied() {
            surface.destroy();
        }
        log::debug!("Disposed {} compute target", width);
    }

    /// Release the second surface, if any. The next feedback pass allocates a new one.
    pub fn dispose_back_buffer(&mut self) {
        if let Some(back) = self.surfaces.get_mut().take_back() {
            back.destroy();
            log::debug!("Disposed back buffer of {} compute target", self.width);
        }
    }

    /// Texture views for the planned texture uniforms, swapping first if the
    /// plan reads this target.
    fn resolve(&self, plan: &UniformPlan<'_>) -> Result<Vec<(u32, TextureView)>, TargetError> {
        let feedback = if plan.references(self) {
            Some(self.swap()?)
        } else {
            None
        };

        Ok(plan
            .textures()
            .iter()
            .map(|binding| {
                let view = match &feedback {
                    Some(previous) if binding.reads(self) => previous.clone(),
                    _ => binding.target.front_view(),
                };
                (binding.binding, view)
            })
            .collect())
    }

    /// Flip to the other surface and return a view of the previous one.
    fn swap(&self) -> Result<TextureView, TargetError> {
        let mut surfaces = self.surfaces.borrow_mut();
        let (previous, allocated) = surfaces.swap(|| {
            Surface::for_compute(&self.device, "compute_target_b", self.width())
        })?;
        if allocated {
            log::debug!("Allocated back buffer for {} compute target", self.width);
        }
        Ok(previous.view().clone())
    }

    fn front_view(&self) -> TextureView {
        self.surfaces.borrow().front().view().clone()
    }

    fn draw(
        &self,
        program: &ComputeProgram,
        plan: &UniformPlan<'_>,
        textures: &[(u32, TextureView)],
        geometry: &Geometry,
        load: wgpu::LoadOp<wgpu::Color>,
        label: &str,
    ) {
        let bind_group = program.bind_group(
            &self.device,
            &self.queue,
            &self.resources.sampler,
            plan.params(),
            textures,
        );

        let surfaces = self.surfaces.borrow();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compute_target_encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surfaces.front().view(),
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let size = self.width() as f32;
            pass.set_pipeline(program.pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, geometry.buffer().slice(..));
            pass.set_viewport(0.0, 0.0, size, size, 0.0, 1.0);
            pass.draw(0..geometry.vertex_count(), 0..1);
        }

        self.queue.submit(Some(encoder.finish()));
    }

    fn read_region(&self, region: PixelRegion) -> Result<Vec<u8>, TargetError> {
        let readback = ReadbackBuffer::new(&self.device, region.width, region.height);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        {
            let surfaces = self.surfaces.borrow();
            readback.copy_from(&mut encoder, surfaces.front().texture(), region.x, region.y);
        }
        self.queue.submit(Some(encoder.finish()));
        readback.read_pixels(&self.device)
    }

    fn fill(
        output: &mut [u8],
        region: PixelRegion,
        read: impl FnOnce(PixelRegion) -> Result<Vec<u8>, TargetError>,
    ) -> Result<(), TargetError> {
        let needed = region.byte_len();
        if output.len() < needed {
            return Err(TargetError::BufferTooSmall {
                needed,
                got: output.len(),
            });
        }
        let pixels = read(region)?;
        output[..needed].copy_from_slice(&pixels);
        Ok(())
    }

    fn write_rows(&self, texture: &wgpu::Texture, data: &[u8], y: u32, width: u32, height: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * BYTES_PER_TEXEL),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl fmt::Debug for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ComputeTarget");
        s.field("width", &self.width.get());
        match self.surfaces.try_borrow() {
            Ok(surfaces) => s.field("back_buffer", &surfaces.back().is_some()),
            Err(_) => s.field("back_buffer", &format_args!("<borrowed>")),
        };
        s.finish()
    }
}
