//! Raw C ABI shared with the C++ shim (see `include/liteport_bridge.h`).
//!
//! Use the RAII wrappers in `native` instead of calling these directly.

use std::ffi::c_char;

/// Version of the [`BridgeApi`] layout this crate was written against.
pub const BRIDGE_ABI_VERSION: u32 = 1;

pub const LP_OK: i32 = 0;
pub const LP_ERR_LOAD: i32 = 1;
pub const LP_ERR_DTYPE: i32 = 2;
pub const LP_ERR_SHAPE: i32 = 3;
pub const LP_ERR_INFERENCE: i32 = 4;
pub const LP_ERR_OUT_OF_MEMORY: i32 = 5;

// Scalar type codes follow the interpreter's own `c10::ScalarType`.
pub const LP_DTYPE_U8: i32 = 0;
pub const LP_DTYPE_I32: i32 = 3;
pub const LP_DTYPE_I64: i32 = 4;
pub const LP_DTYPE_F32: i32 = 6;
pub const LP_DTYPE_F64: i32 = 7;
pub const LP_DTYPE_BOOL: i32 = 11;

pub const LP_ERROR_MESSAGE_LEN: usize = 512;

#[repr(C)]
pub struct LpModule {
    _private: [u8; 0],
}

#[repr(C)]
pub struct LpTensor {
    _private: [u8; 0],
}

#[repr(C)]
pub struct LpOutputs {
    _private: [u8; 0],
}

/// Filled by the shim when it catches a C++ exception.
#[repr(C)]
pub struct LpError {
    pub status: i32,
    pub message: [c_char; LP_ERROR_MESSAGE_LEN],
}

impl LpError {
    pub fn new() -> Self {
        Self {
            status: LP_OK,
            message: [0; LP_ERROR_MESSAGE_LEN],
        }
    }

    pub fn message(&self) -> String {
        let bytes: Vec<u8> = self
            .message
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Default for LpError {
    fn default() -> Self {
        Self::new()
    }
}

/// Function table exported by the shim as `liteport_bridge_api()`.
///
/// Ownership: every `*mut` returned by a `*_load_*`, `tensor_create` or
/// `module_run_method` call is retained for the caller and must be passed to
/// the matching `*_release` exactly once. Pointers returned by accessors
/// (`outputs_get`, `tensor_shape`, ...) are borrowed from their owner.
#[repr(C)]
pub struct BridgeApi {
    pub abi_version: u32,

    pub runtime_init: unsafe extern "C" fn(num_threads: u32, err: *mut LpError) -> i32,

    pub module_load_file:
        unsafe extern "C" fn(path: *const c_char, err: *mut LpError) -> *mut LpModule,
    pub module_load_buffer:
        unsafe extern "C" fn(data: *const u8, len: usize, err: *mut LpError) -> *mut LpModule,
    pub module_release: unsafe extern "C" fn(module: *mut LpModule),
    pub module_has_method: unsafe extern "C" fn(module: *const LpModule, name: *const c_char) -> bool,
    pub module_run_method: unsafe extern "C" fn(
        module: *mut LpModule,
        method: *const c_char,
        inputs: *const *mut LpTensor,
        num_inputs: usize,
        err: *mut LpError,
    ) -> *mut LpOutputs,

    /// Copies `nbytes` from `data`; the caller keeps ownership of `data`.
    pub tensor_create: unsafe extern "C" fn(
        dtype: i32,
        shape: *const i64,
        ndim: usize,
        data: *const u8,
        nbytes: usize,
        err: *mut LpError,
    ) -> *mut LpTensor,
    pub tensor_release: unsafe extern "C" fn(tensor: *mut LpTensor),
    pub tensor_dtype: unsafe extern "C" fn(tensor: *const LpTensor) -> i32,
    pub tensor_ndim: unsafe extern "C" fn(tensor: *const LpTensor) -> usize,
    pub tensor_shape: unsafe extern "C" fn(tensor: *const LpTensor) -> *const i64,
    /// Strides in elements.
    pub tensor_strides: unsafe extern "C" fn(tensor: *const LpTensor) -> *const i64,
    /// Address of the view's first element.
    pub tensor_data: unsafe extern "C" fn(tensor: *const LpTensor) -> *const u8,
    /// Bytes readable from `tensor_data`.
    pub tensor_nbytes: unsafe extern "C" fn(tensor: *const LpTensor) -> usize,

    /// Output tensors, with tuples and lists flattened depth-first.
    pub outputs_len: unsafe extern "C" fn(outputs: *const LpOutputs) -> usize,
    pub outputs_get: unsafe extern "C" fn(outputs: *const LpOutputs, index: usize) -> *const LpTensor,
    pub outputs_release: unsafe extern "C" fn(outputs: *mut LpOutputs),
}

#[cfg(feature = "link-native")]
extern "C" {
    pub fn liteport_bridge_api() -> *const BridgeApi;
}

