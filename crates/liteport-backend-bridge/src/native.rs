//! Owning wrappers over the shim's raw pointers.
//!
//! Each wrapper releases its object exactly once on drop, so an early `?`
//! anywhere in a forward pass cannot leak native memory.

use std::ffi::CStr;
use std::ptr::NonNull;
use std::slice;

use liteport_core::{layout, DType, Error, ErrorKind, Result, Tensor};

use crate::ffi::{self, BridgeApi, LpError, LpModule, LpOutputs, LpTensor};

/// Turns a failed shim call into a liteport error.
///
/// `fallback` is used when the shim reports a generic failure for a call
/// whose failure mode is known (loading reports load errors, and so on).
pub(crate) fn translate(err: &LpError, fallback: ErrorKind) -> Error {
    let message = err.message();
    let message = if message.is_empty() {
        format!("native call failed with status {}", err.status)
    } else {
        message
    };
    let kind = match err.status {
        ffi::LP_ERR_LOAD => ErrorKind::ModelLoad,
        ffi::LP_ERR_DTYPE => ErrorKind::UnsupportedDType,
        ffi::LP_ERR_SHAPE => ErrorKind::ShapeMismatch,
        ffi::LP_ERR_INFERENCE => ErrorKind::Inference,
        ffi::LP_ERR_OUT_OF_MEMORY => {
            return Error::from_kind(fallback, format!("out of memory: {message}"))
        }
        _ => fallback,
    };
    Error::from_kind(kind, message)
}

fn checked<T>(ptr: *mut T, err: &LpError, fallback: ErrorKind) -> Result<NonNull<T>> {
    match NonNull::new(ptr) {
        Some(ptr) if err.status == ffi::LP_OK => Ok(ptr),
        _ if err.status != ffi::LP_OK => Err(translate(err, fallback)),
        _ => Err(Error::from_kind(
            fallback,
            "bridge returned no object and no error",
        )),
    }
}

pub(crate) fn dtype_code(dtype: DType) -> i32 {
    match dtype {
        DType::F32 => ffi::LP_DTYPE_F32,
        DType::F64 => ffi::LP_DTYPE_F64,
        DType::I32 => ffi::LP_DTYPE_I32,
        DType::I64 => ffi::LP_DTYPE_I64,
        DType::U8 => ffi::LP_DTYPE_U8,
        DType::Bool => ffi::LP_DTYPE_BOOL,
    }
}

pub(crate) fn dtype_from_code(code: i32) -> Result<DType> {
    match code {
        ffi::LP_DTYPE_F32 => Ok(DType::F32),
        ffi::LP_DTYPE_F64 => Ok(DType::F64),
        ffi::LP_DTYPE_I32 => Ok(DType::I32),
        ffi::LP_DTYPE_I64 => Ok(DType::I64),
        ffi::LP_DTYPE_U8 => Ok(DType::U8),
        ffi::LP_DTYPE_BOOL => Ok(DType::Bool),
        other => Err(Error::UnsupportedDType(format!(
            "runtime produced a tensor with scalar type code {other}"
        ))),
    }
}

pub(crate) struct NativeModule {
    api: &'static BridgeApi,
    raw: NonNull<LpModule>,
}

// The interpreter module has no thread affinity; `BridgeModel` is only ever
// used behind the handle's mutex, so calls never overlap.
unsafe impl Send for NativeModule {}

impl NativeModule {
    pub(crate) fn from_raw(api: &'static BridgeApi, raw: *mut LpModule, err: &LpError) -> Result<Self> {
        let raw = checked(raw, err, ErrorKind::ModelLoad)?;
        Ok(Self { api, raw })
    }

    pub(crate) fn has_method(&self, name: &CStr) -> bool {
        unsafe { (self.api.module_has_method)(self.raw.as_ptr(), name.as_ptr()) }
    }

    pub(crate) fn run_method(&mut self, method: &CStr, inputs: &[NativeTensor]) -> Result<NativeOutputs> {
        let raw_inputs: Vec<*mut LpTensor> = inputs.iter().map(|t| t.raw.as_ptr()).collect();
        let mut err = LpError::new();
        let raw = unsafe {
            (self.api.module_run_method)(
                self.raw.as_ptr(),
                method.as_ptr(),
                raw_inputs.as_ptr(),
                raw_inputs.len(),
                &mut err,
            )
        };
        let raw = checked(raw, &err, ErrorKind::Inference)?;
        Ok(NativeOutputs { api: self.api, raw })
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        unsafe { (self.api.module_release)(self.raw.as_ptr()) }
    }
}

/// A tensor owned by the caller on the native side.
pub struct NativeTensor {
    api: &'static BridgeApi,
    raw: NonNull<LpTensor>,
}

unsafe impl Send for NativeTensor {}

impl NativeTensor {
    /// Copies `tensor` into a freshly allocated native tensor.
    pub(crate) fn create(api: &'static BridgeApi, tensor: &Tensor) -> Result<Self> {
        let shape = tensor
            .shape()
            .dims()
            .iter()
            .map(|d| {
                i64::try_from(*d).map_err(|_| {
                    Error::ShapeMismatch(format!("dimension {d} does not fit the native index type"))
                })
            })
            .collect::<Result<Vec<i64>>>()?;
        let data = tensor.data();
        let mut err = LpError::new();
        let raw = unsafe {
            (api.tensor_create)(
                dtype_code(tensor.dtype()),
                shape.as_ptr(),
                shape.len(),
                data.as_ptr(),
                data.len(),
                &mut err,
            )
        };
        let raw = checked(raw, &err, ErrorKind::Inference)?;
        Ok(Self { api, raw })
    }

    pub(crate) fn view(&self) -> TensorView<'_> {
        TensorView {
            api: self.api,
            raw: self.raw.as_ptr(),
            _owner: std::marker::PhantomData,
        }
    }
}

impl Drop for NativeTensor {
    fn drop(&mut self) {
        unsafe { (self.api.tensor_release)(self.raw.as_ptr()) }
    }
}

/// Result list of one `module_run_method` call.
pub(crate) struct NativeOutputs {
    api: &'static BridgeApi,
    raw: NonNull<LpOutputs>,
}

impl NativeOutputs {
    pub(crate) fn len(&self) -> usize {
        unsafe { (self.api.outputs_len)(self.raw.as_ptr()) }
    }

    pub(crate) fn get(&self, index: usize) -> Result<TensorView<'_>> {
        let raw = unsafe { (self.api.outputs_get)(self.raw.as_ptr(), index) };
        if raw.is_null() {
            return Err(Error::Inference(format!("bridge returned no tensor for output {index}")));
        }
        Ok(TensorView {
            api: self.api,
            raw,
            _owner: std::marker::PhantomData,
        })
    }
}

impl Drop for NativeOutputs {
    fn drop(&mut self) {
        unsafe { (self.api.outputs_release)(self.raw.as_ptr()) }
    }
}

/// Borrowed read access to a native tensor, valid while its owner lives.
pub(crate) struct TensorView<'a> {
    api: &'static BridgeApi,
    raw: *const LpTensor,
    _owner: std::marker::PhantomData<&'a ()>,
}

impl TensorView<'_> {
    /// Copies the (possibly strided) native view into a contiguous tensor.
    pub(crate) fn to_tensor(&self) -> Result<Tensor> {
        let api = self.api;
        let dtype = dtype_from_code(unsafe { (api.tensor_dtype)(self.raw) })?;
        let ndim = unsafe { (api.tensor_ndim)(self.raw) };
        let dims = read_dims(unsafe { (api.tensor_shape)(self.raw) }, ndim, "dimension")?;
        let strides = read_dims(unsafe { (api.tensor_strides)(self.raw) }, ndim, "stride")?;

        let data_ptr = unsafe { (api.tensor_data)(self.raw) };
        let nbytes = unsafe { (api.tensor_nbytes)(self.raw) };
        let base: &[u8] = if data_ptr.is_null() || nbytes == 0 {
            &[]
        } else {
            unsafe { slice::from_raw_parts(data_ptr, nbytes) }
        };

        let data = if layout::is_contiguous(&dims, &strides) {
            let len = dims
                .iter()
                .product::<usize>()
                .saturating_mul(dtype.size_bytes());
            base.get(..len)
                .ok_or_else(|| {
                    Error::Inference(format!(
                        "native buffer of {nbytes} bytes is too small for a {dtype} tensor of shape {dims:?}"
                    ))
                })?
                .to_vec()
        } else {
            layout::copy_strided(&dims, &strides, dtype.size_bytes(), base)?
        };
        Tensor::new(dtype, dims, data)
    }
}

fn read_dims(ptr: *const i64, ndim: usize, what: &str) -> Result<Vec<usize>> {
    if ndim == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(Error::Inference(format!("bridge reported no {what}s for a rank-{ndim} tensor")));
    }
    let raw = unsafe { slice::from_raw_parts(ptr, ndim) };
    raw.iter()
        .map(|v| {
            usize::try_from(*v)
                .map_err(|_| Error::Inference(format!("bridge reported negative {what} {v}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_with(status: i32, message: &str) -> LpError {
        let mut err = LpError::new();
        err.status = status;
        for (dst, src) in err.message.iter_mut().zip(message.bytes()) {
            *dst = src as std::ffi::c_char;
        }
        err
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let cases = [
            (ffi::LP_ERR_LOAD, ErrorKind::ModelLoad),
            (ffi::LP_ERR_DTYPE, ErrorKind::UnsupportedDType),
            (ffi::LP_ERR_SHAPE, ErrorKind::ShapeMismatch),
            (ffi::LP_ERR_INFERENCE, ErrorKind::Inference),
        ];
        for (status, kind) in cases {
            let err = translate(&error_with(status, "boom"), ErrorKind::Inference);
            assert_eq!(err.kind(), kind);
            assert_eq!(err.message(), "boom");
        }
    }

    #[test]
    fn unknown_status_and_oom_use_the_call_site_kind() {
        let err = translate(&error_with(99, ""), ErrorKind::ModelLoad);
        assert_eq!(err.kind(), ErrorKind::ModelLoad);
        assert!(err.message().contains("99"));

        let err = translate(&error_with(ffi::LP_ERR_OUT_OF_MEMORY, "alloc"), ErrorKind::Inference);
        assert_eq!(err.kind(), ErrorKind::Inference);
        assert!(err.message().contains("out of memory"));
    }

    #[test]
    fn dtype_codes_are_bijective_for_supported_types() -> liteport_core::Result<()> {
        for d in DType::ALL {
            assert_eq!(dtype_from_code(dtype_code(d))?, d);
        }
        // c10 Half
        assert_eq!(dtype_from_code(5).unwrap_err().kind(), ErrorKind::UnsupportedDType);
        Ok(())
    }
}
