//! Row-major reconciliation of strided native buffers.

use crate::{Error, Result};

/// Contiguous row-major strides for `dims`, in elements.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].saturating_mul(dims[i + 1]);
    }
    strides
}

/// Strides of size-0/1 dimensions never matter and are ignored.
pub fn is_contiguous(dims: &[usize], strides: &[usize]) -> bool {
    dims.len() == strides.len()
        && dims
            .iter()
            .zip(strides.iter().zip(contiguous_strides(dims)))
            .all(|(d, (s, e))| *d <= 1 || *s == e)
}

/// Copies the elements of a strided view into a fresh contiguous buffer.
///
/// `base` starts at the view's first element; `strides` are in elements.
pub fn copy_strided(dims: &[usize], strides: &[usize], elem_size: usize, base: &[u8]) -> Result<Vec<u8>> {
    if dims.len() != strides.len() {
        return Err(Error::ShapeMismatch(format!(
            "native tensor reports {} dims but {} strides",
            dims.len(),
            strides.len()
        )));
    }

    let numel: usize = dims.iter().product();
    let mut out = Vec::with_capacity(numel * elem_size);
    if numel == 0 {
        return Ok(out);
    }

    let span = dims
        .iter()
        .zip(strides)
        .map(|(d, s)| (d - 1) * s)
        .sum::<usize>()
        + 1;
    if span * elem_size > base.len() {
        return Err(Error::Inference(format!(
            "native buffer of {} bytes is too small for a view spanning {span} elements",
            base.len()
        )));
    }

    let mut index = vec![0usize; dims.len()];
    for _ in 0..numel {
        let offset: usize = index.iter().zip(strides).map(|(i, s)| i * s).sum();
        let start = offset * elem_size;
        out.extend_from_slice(&base[start..start + elem_size]);

        for axis in (0..dims.len()).rev() {
            index[axis] += 1;
            if index[axis] < dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Ok(out)
}
