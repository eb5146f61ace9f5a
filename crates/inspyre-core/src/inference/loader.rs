//! Checkpoint loading for safetensors files.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Loads a safetensors checkpoint and creates a `VarBuilder` over it.
///
/// Tensor names are kept as stored, so a converted PyTorch checkpoint
/// resolves `context1.branch1.conv0.conv.weight` and
/// friends directly. Tensors are converted to `f32` on access.
///
/// # Arguments
///
/// * `path` - Path to the safetensors file
/// * `device` - Device to load tensors onto
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The safetensors data is invalid
/// - A tensor uses a dtype candle does not support
pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<VarBuilder<'static>> {
    let path = path.as_ref();
    debug!("Loading safetensors from {}", path.display());

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;

    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    let mut tensor_map: HashMap<String, Tensor> = HashMap::new();

    for name in tensors.names() {
        let tensor_view = tensors
            .tensor(name)
            .with_context(|| format!("Failed to get tensor '{name}'"))?;

        let dtype = safetensors_dtype_to_candle(tensor_view.dtype())
            .with_context(|| format!("Tensor '{name}'"))?;
        let shape: Vec<usize> = tensor_view.shape().to_vec();

        let tensor = Tensor::from_raw_buffer(tensor_view.data(), dtype, &shape, device)
            .with_context(|| format!("Failed to create tensor '{name}'"))?;

        tensor_map.insert(name.clone(), tensor);
    }

    debug!("Loaded {} tensors from {}", tensor_map.len(), path.display());

    Ok(VarBuilder::from_tensors(tensor_map, DType::F32, device))
}

/// Converts safetensors dtype to candle dtype.
fn safetensors_dtype_to_candle(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        S::I64 => Ok(DType::I64),
        S::U8 => Ok(DType::U8),
        S::U32 => Ok(DType::U32),
        other => anyhow::bail!("Unsupported dtype: {other:?}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_checkpoint(entries: &[(&str, safetensors::Dtype, Vec<usize>, &[u8])]) -> NamedTempFile {
        use safetensors::serialize;
        use safetensors::tensor::TensorView;

        let tensors: HashMap<String, TensorView<'_>> = entries
            .iter()
            .map(|(name, dtype, shape, bytes)| {
                let view = TensorView::new(*dtype, shape.clone(), bytes).expect("valid tensor view");
                ((*name).to_string(), view)
            })
            .collect();
        let serialized = serialize(&tensors, &None).expect("serialize");

        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(&serialized).expect("write");
        file
    }

    #[test]
    fn test_load_safetensors_resolves_checkpoint_names() {
        let threshold: Vec<f32> = vec![0.25];
        let weight: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let file = write_checkpoint(&[
            (
                "attention0.threshold",
                safetensors::Dtype::F32,
                vec![1],
                bytemuck::cast_slice(&threshold),
            ),
            (
                "decoder.conv5.conv.weight",
                safetensors::Dtype::F32,
                vec![1, 1, 2, 2],
                bytemuck::cast_slice(&weight),
            ),
        ]);

        let vb = load_safetensors(file.path(), &Device::Cpu).unwrap();
        let t = vb.pp("attention0").get(1, "threshold").unwrap();
        assert_eq!(t.to_vec1::<f32>().unwrap(), vec![0.25]);

        let w = vb.pp("decoder").pp("conv5").pp("conv").get((1, 1, 2, 2), "weight").unwrap();
        assert_eq!(w.flatten_all().unwrap().to_vec1::<f32>().unwrap(), weight);
    }

    #[test]
    fn test_load_safetensors_shape_mismatch_is_reported() {
        let data: Vec<f32> = vec![1.0, 2.0];
        let file = write_checkpoint(&[(
            "attention0.threshold",
            safetensors::Dtype::F32,
            vec![2],
            bytemuck::cast_slice(&data),
        )]);

        let vb = load_safetensors(file.path(), &Device::Cpu).unwrap();
        assert!(vb.pp("attention0").get(1, "threshold").is_err());
    }

    #[test]
    fn test_load_safetensors_unsupported_dtype() {
        let file = write_checkpoint(&[("mask", safetensors::Dtype::BOOL, vec![2], &[0, 1])]);
        let err = load_safetensors(file.path(), &Device::Cpu)
            .err()
            .expect("bool dtype must be rejected");
        assert!(format!("{err:#}").contains("Unsupported dtype"));
    }

    #[test]
    fn test_load_safetensors_missing_file() {
        let result = load_safetensors("/nonexistent/inspyrenet.safetensors", &Device::Cpu);
        assert!(result.is_err());
    }
}
