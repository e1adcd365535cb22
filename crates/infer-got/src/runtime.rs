use anyhow::{Context, Result};
use candle_core::{DType, Device};
use got_ocr_core::runtime::{DeviceKind, Precision};

/// Opens the requested device and picks a dtype: the explicit precision if
/// given, else f16 on accelerators and f32 on CPU.
pub fn prepare_device_and_dtype(
    device: DeviceKind,
    precision: Option<Precision>,
) -> Result<(Device, DType)> {
    let device = match device {
        DeviceKind::Cpu => Device::Cpu,
        DeviceKind::Metal => Device::new_metal(0).context("failed to initialise Metal device")?,
        DeviceKind::Cuda => Device::new_cuda(0).context("failed to initialise CUDA device")?,
    };
    let dtype = precision
        .map(dtype_from_precision)
        .unwrap_or_else(|| default_dtype_for_device(&device));
    Ok((device, dtype))
}

pub fn default_dtype_for_device(device: &Device) -> DType {
    if device.is_metal() || device.is_cuda() {
        DType::F16
    } else {
        DType::F32
    }
}

pub fn dtype_from_precision(p: Precision) -> DType {
    match p {
        Precision::F32 => DType::F32,
        Precision::F16 => DType::F16,
        Precision::Bf16 => DType::BF16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_defaults_to_f32() {
        let (device, dtype) = prepare_device_and_dtype(DeviceKind::Cpu, None).unwrap();
        assert!(device.is_cpu());
        assert_eq!(dtype, DType::F32);
    }

    #[test]
    fn explicit_precision_wins() {
        let (_, dtype) = prepare_device_and_dtype(DeviceKind::Cpu, Some(Precision::Bf16)).unwrap();
        assert_eq!(dtype, DType::BF16);
    }
}
