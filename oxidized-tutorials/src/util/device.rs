use candle_core::Device;
use tracing::warn;

/// Select the device to run on.
///
/// Returns the first CUDA device when `cuda` is set and CUDA is available,
/// otherwise the CPU.
pub fn select_device(cuda: bool) -> Device {
    if cuda {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(err) => warn!("CUDA device is not available, falling back to CPU: {err}"),
        }
    }

    Device::Cpu
}

#[cfg(test)]
pub(crate) mod tests {
    use candle_core::Device;

    use super::select_device;

    /// Get devices to test on.
    pub fn test_devices() -> Vec<Device> {
        let mut devices = vec![Device::Cpu];

        if let Ok(device) = Device::new_cuda(0) {
            devices.push(device);
        }

        if let Ok(device) = Device::new_metal(0) {
            devices.push(device);
        }

        devices
    }

    #[test]
    fn cpu_is_selected_without_cuda() {
        assert!(select_device(false).is_cpu());
    }
}
