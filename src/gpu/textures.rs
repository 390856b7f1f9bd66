//! Texture management for compute surfaces.

use wgpu::{Device, Sampler, Texture, TextureFormat, TextureUsages, TextureView};

use super::target::TargetError;

/// Every compute surface stores packed 8-bit RGBA texels.
pub const COMPUTE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Bytes per RGBA8 texel.
pub const BYTES_PER_TEXEL: u32 = 4;

/// A drawable, sampleable surface that owns both texture and view.
/// The texture must outlive its view, so we keep them together.
pub struct Surface {
    texture: Texture,
    view: TextureView,
}

impl Surface {
    /// Create a new surface with the specified usage flags.
    pub fn new(
        device: &Device,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    /// Create a square compute surface: drawn to, sampled, uploaded to and read back.
    ///
    /// Allocation runs inside out-of-memory and validation error scopes, so a
    /// refused texture comes back as `ResourceCreation` instead of reaching the
    /// device's uncaptured error handler.
    pub fn for_compute(device: &Device, label: &str, width: u32) -> Result<Self, TargetError> {
        let out_of_memory = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);

        let surface = Self::new(
            device,
            label,
            width,
            width,
            COMPUTE_FORMAT,
            TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_SRC
                | TextureUsages::COPY_DST,
        );

        // Scopes pop innermost first.
        let validation_error = pollster::block_on(validation.pop());
        let out_of_memory_error = pollster::block_on(out_of_memory.pop());
        if let Some(err) = validation_error.or(out_of_memory_error) {
            log::error!("Failed to allocate {0}x{0} surface '{1}': {2}", width, label, err);
            return Err(TargetError::ResourceCreation(format!("{}: {}", label, err)));
        }

        Ok(surface)
    }

    /// Get the texture view for rendering or sampling.
    pub fn view(&self) -> &TextureView {
        &self.view
    }

    /// Get the underlying texture (for copy operations).
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Release the GPU memory now rather than when the last handle drops.
    pub fn destroy(self) {
        self.texture.destroy();
    }
}

/// Sampler with exact per-texel addressing: no interpolation, no wraparound.
pub fn create_nearest_sampler(device: &Device) -> Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("nearest_clamp_sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

/// Readback buffer for copying a texture region to the CPU.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row_bytes: u32,
    unpadded_row_bytes: u32,
}

impl ReadbackBuffer {
    /// Create a new readback buffer sized for the given dimensions.
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let unpadded_row_bytes = width * BYTES_PER_TEXEL;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: (padded_row_bytes * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            width,
            height,
            padded_row_bytes,
            unpadded_row_bytes,
        }
    }

    /// Get the padded bytes per row (for texture copy).
    pub fn padded_row_bytes(&self) -> u32 {
        self.padded_row_bytes
    }

    /// Record a copy of the region starting at `(x, y)` into this buffer.
    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, texture: &Texture, x: u32, y: u32) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Read pixels from the mapped buffer, removing row padding.
    ///
    /// Blocks until every submission recorded so far has completed.
    pub fn read_pixels(&self, device: &Device) -> Result<Vec<u8>, TargetError> {
        let buffer_slice = self.buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| TargetError::BufferMapFailed(e.to_string()))?;

        receiver
            .recv()
            .map_err(|e| TargetError::BufferMapFailed(e.to_string()))?
            .map_err(|e| TargetError::BufferMapFailed(format!("{:?}", e)))?;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((self.unpadded_row_bytes * self.height) as usize);
        for row in 0..self.height {
            let start = (row * self.padded_row_bytes) as usize;
            let end = start + self.unpadded_row_bytes as usize;
            pixels.extend_from_slice(&data[start..end]);
        }
        drop(data);
        self.buffer.unmap();

        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[tokio::test]
    async fn test_surface_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let surface =
            Surface::for_compute(&ctx.device, "test", 256).expect("Failed to create surface");
        assert_eq!(surface.texture().width(), 256);
        assert_eq!(surface.texture().height(), 256);
        assert_eq!(surface.texture().format(), COMPUTE_FORMAT);
        surface.destroy();
    }

    #[tokio::test]
    async fn test_refused_surface_reports_resource_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let too_wide = ctx.device.limits().max_texture_dimension_2d.saturating_mul(2);
        let result = Surface::for_compute(&ctx.device, "too_wide", too_wide);
        assert!(matches!(result, Err(TargetError::ResourceCreation(_))));

        // The device is still usable afterwards.
        assert!(Surface::for_compute(&ctx.device, "after_failure", 4).is_ok());
    }

    #[tokio::test]
    async fn test_readback_buffer_padding() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let buffer = ReadbackBuffer::new(&ctx.device, 3, 2);
        assert_eq!(buffer.padded_row_bytes(), wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let buffer = ReadbackBuffer::new(&ctx.device, 256, 256);
        assert_eq!(buffer.padded_row_bytes(), 256 * 4);
    }
}
