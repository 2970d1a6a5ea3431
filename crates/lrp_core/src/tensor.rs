//! Moving tensors between the burn device and host `ndarray` storage.

use burn::prelude::*;
use burn::tensor::TensorData;
use ndarray::Array2;

use crate::error::{CoreError, Result};

/// Read any float tensor back to the host as row-major `f32` values.
///
/// # Errors
///
/// Returns [`CoreError::TensorData`] if the backend data cannot be read as `f32`.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CoreError::TensorData(format!("{e:?}")))
}

/// Read a matrix back to the host.
///
/// # Errors
///
/// Returns an error if the data cannot be read or does not fit the tensor dims.
pub fn tensor_to_array2<B: Backend>(tensor: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [rows, cols] = tensor.dims();
    let values = tensor_to_vec(tensor)?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| CoreError::ShapeMismatch(format!("{rows}x{cols} matrix: {e}")))
}

/// Upload row-major values as a tensor of the given dims.
///
/// # Errors
///
/// Returns [`CoreError::ShapeMismatch`] if `values` does not hold exactly
/// `dims.iter().product()` elements.
pub fn vec_to_tensor<B: Backend, const D: usize>(
    values: Vec<f32>,
    dims: [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let expected: usize = dims.iter().product();
    if values.len() != expected {
        return Err(CoreError::ShapeMismatch(format!(
            "{} values cannot fill dims {:?}",
            values.len(),
            dims
        )));
    }
    Ok(Tensor::from_data(TensorData::new(values, dims), device))
}

/// Upload a host matrix to the device.
pub fn array2_to_tensor<B: Backend>(array: &Array2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = array.dim();
    let values: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

/// Flatten a batch tensor of any rank to `[batch, features]`.
pub fn flatten_batch<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, 2> {
    let dims = tensor.dims();
    let batch = dims[0];
    let features: usize = dims[1..].iter().product();
    tensor.reshape([batch, features])
}

/// Index of the largest value in every row of a `[rows, cols]` tensor.
///
/// Ties resolve to the lowest index; NaN never wins.
///
/// # Errors
///
/// Returns an error if the tensor data cannot be read.
pub fn argmax_per_row<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<usize>> {
    let [_, cols] = tensor.dims();
    let values = tensor_to_vec(tensor)?;
    if cols == 0 {
        return Err(CoreError::ShapeMismatch("argmax over zero columns".to_string()));
    }
    Ok(values
        .chunks(cols)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max {
                        (i, v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect())
}
