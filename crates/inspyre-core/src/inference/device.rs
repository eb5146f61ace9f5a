//! Device selection for inference.

use candle_core::Device;
use tracing::info;

/// Returns the best available device for inference.
///
/// Uses Metal or CUDA when the crate is built with the matching feature
/// and a device is present, falling back to CPU.
#[must_use]
pub fn get_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device for saliency inference");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device for saliency inference");
            return device;
        }
    }

    info!("Using CPU for saliency inference");
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_device_without_gpu_features_is_cpu() {
        let device = get_device();
        if cfg!(not(any(feature = "metal", feature = "cuda"))) {
            assert!(device.is_cpu());
        }
    }
}
