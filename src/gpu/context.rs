//! GPU context initialization and management.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use wgpu::{Adapter, Device, Instance, Queue, Sampler};

use super::geometry::Geometry;
use super::program::{ComputeProgram, ProgramError};
use super::textures::create_nearest_sampler;
use super::transpose;

/// Errors that can occur during GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("Failed to build internal program: {0}")]
    Program(#[from] ProgramError),
}

/// Which graphics backend to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Metal on macOS, Vulkan or DX12 elsewhere, GL as a fallback.
    #[default]
    Auto,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl BackendChoice {
    fn backends(self) -> wgpu::Backends {
        match self {
            BackendChoice::Auto => {
                wgpu::Backends::METAL
                    | wgpu::Backends::VULKAN
                    | wgpu::Backends::DX12
                    | wgpu::Backends::GL
            }
            BackendChoice::Vulkan => wgpu::Backends::VULKAN,
            BackendChoice::Metal => wgpu::Backends::METAL,
            BackendChoice::Dx12 => wgpu::Backends::DX12,
            BackendChoice::Gl => wgpu::Backends::GL,
        }
    }
}

/// Adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerChoice {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<PowerChoice> for wgpu::PowerPreference {
    fn from(power: PowerChoice) -> Self {
        match power {
            PowerChoice::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerChoice::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

/// Configuration for context creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub backend: BackendChoice,
    pub power: PowerChoice,
    /// Device label shown in GPU debuggers and validation messages.
    pub label: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            power: PowerChoice::HighPerformance,
            label: "texel-compute".to_string(),
        }
    }
}

impl ContextConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Resources every target created from one context shares.
pub(crate) struct SharedResources {
    pub sampler: Sampler,
    pub quad: Geometry,
    pub transpose: ComputeProgram,
    points: Mutex<HashMap<u32, Arc<Geometry>>>,
}

impl SharedResources {
    fn new(device: &Device) -> Result<Self, ProgramError> {
        Ok(Self {
            sampler: create_nearest_sampler(device),
            quad: Geometry::quad(device),
            transpose: transpose::build_program(device)?,
            points: Mutex::new(HashMap::new()),
        })
    }

    /// Per-texel point list for `width`, created on first use.
    pub fn points(&self, device: &Device, width: u32) -> Arc<Geometry> {
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        points
            .entry(width)
            .or_insert_with(|| {
                log::debug!("Creating {0}x{0} texel point list", width);
                Arc::new(Geometry::points(device, width))
            })
            .clone()
    }
}

/// GPU context holding device and queue for compute passes.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub(crate) resources: Arc<SharedResources>,
}

impl GpuContext {
    /// Create a new headless GPU context with the default configuration.
    ///
    /// Prefers Metal on macOS, falls back to other backends.
    pub async fn new() -> Result<Self, GpuError> {
        Self::with_config(&ContextConfig::default()).await
    }

    /// Create a new headless GPU context.
    pub async fn with_config(config: &ContextConfig) -> Result<Self, GpuError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backend.backends(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power.into(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Using GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(config.label.as_str()),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let resources = SharedResources::new(&device)?;

        Ok(Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            resources: Arc::new(resources),
        })
    }

    /// Get info about the GPU adapter.
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Largest target width the device supports.
    pub fn max_target_width(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}
