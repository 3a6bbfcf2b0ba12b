//! Device selection for embedding and training.

use anyhow::Result;
use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Requested compute device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreference {
    Cuda,
    Metal,
    Cpu,
    #[default]
    Auto,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            _ => Err(anyhow::anyhow!(
                "Invalid device preference: {}. Valid options: cuda, metal, cpu, auto",
                s
            )),
        }
    }
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Resolves a preference to an actual device, falling back to CPU when the
/// requested accelerator is unavailable or not compiled in.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Cuda => try_cuda().unwrap_or_else(|| {
            tracing::warn!("CUDA unavailable, falling back to CPU");
            Device::Cpu
        }),
        DevicePreference::Metal => try_metal().unwrap_or_else(|| {
            tracing::warn!("Metal unavailable, falling back to CPU");
            Device::Cpu
        }),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto => try_cuda()
            .or_else(try_metal)
            .unwrap_or(Device::Cpu),
    };

    tracing::info!("Using {} device", device_name(&device));
    Ok(device)
}

/// Short name for logging.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

fn try_cuda() -> Option<Device> {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => return Some(device),
            Err(e) => tracing::warn!("CUDA initialization failed: {}", e),
        }
    }
    None
}

fn try_metal() -> Option<Device> {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => return Some(device),
            Err(e) => tracing::warn!("Metal initialization failed: {}", e),
        }
    }
    None
}
