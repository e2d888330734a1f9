//! In-process stand-in for the C++ shim, exported through the same C ABI.
//!
//! Models are UTF-8 buffers `fake-lite:<op>[@<len>]` with op one of `neg`,
//! `identity`, `transpose`, `split` or `throw`; `@<len>` makes `forward`
//! insist on a 1-D input of that length. Every module also has an
//! `identity` method. Bookkeeping is per thread, matching one test per
//! thread.

use std::cell::RefCell;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use crate::ffi::{self, BridgeApi, LpError, LpModule, LpOutputs, LpTensor, BRIDGE_ABI_VERSION};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Live {
    pub modules: isize,
    pub tensors: isize,
    pub outputs: isize,
}

#[derive(Default)]
struct State {
    live: Live,
    init_calls: Vec<u32>,
    fail_next_init: bool,
    rejected: Vec<i32>,
}

thread_local! {
    static STATE: RefCell<State> = RefCell::new(State::default());
}

fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
    STATE.with(|s| f(&mut s.borrow_mut()))
}

pub fn live() -> Live {
    with_state(|s| s.live)
}

pub fn init_calls() -> Vec<u32> {
    with_state(|s| s.init_calls.clone())
}

pub fn fail_next_init() {
    with_state(|s| s.fail_next_init = true);
}

pub fn reject_dtype(code: i32) {
    with_state(|s| s.rejected.push(code));
}

pub fn model(spec: &str) -> Vec<u8> {
    format!("fake-lite:{spec}").into_bytes()
}

pub static API: BridgeApi = table(BRIDGE_ABI_VERSION);
pub static FUTURE_API: BridgeApi = table(BRIDGE_ABI_VERSION + 1);

const fn table(abi_version: u32) -> BridgeApi {
    BridgeApi {
        abi_version,
        runtime_init,
        module_load_file,
        module_load_buffer,
        module_release,
        module_has_method,
        module_run_method,
        tensor_create,
        tensor_release,
        tensor_dtype,
        tensor_ndim,
        tensor_shape,
        tensor_strides,
        tensor_data,
        tensor_nbytes,
        outputs_len,
        outputs_get,
        outputs_release,
    }
}

struct FakeModule {
    op: String,
    expect_len: Option<i64>,
}

#[derive(Clone)]
struct FakeTensor {
    dtype: i32,
    shape: Vec<i64>,
    strides: Vec<i64>,
    storage: Arc<Vec<u8>>,
}

struct FakeOutputs {
    tensors: Vec<FakeTensor>,
}

fn elem_size(code: i32) -> Option<usize> {
    match code {
        ffi::LP_DTYPE_U8 | ffi::LP_DTYPE_BOOL => Some(1),
        ffi::LP_DTYPE_I32 | ffi::LP_DTYPE_F32 => Some(4),
        ffi::LP_DTYPE_I64 | ffi::LP_DTYPE_F64 => Some(8),
        _ => None,
    }
}

unsafe fn fail(err: *mut LpError, status: i32, message: &str) {
    let Some(err) = err.as_mut() else { return };
    err.status = status;
    err.message = [0; ffi::LP_ERROR_MESSAGE_LEN];
    for (dst, src) in err
        .message
        .iter_mut()
        .zip(message.bytes().take(ffi::LP_ERROR_MESSAGE_LEN - 1))
    {
        *dst = src as c_char;
    }
}

unsafe extern "C" fn runtime_init(num_threads: u32, err: *mut LpError) -> i32 {
    let fail_now = with_state(|s| {
        s.init_calls.push(num_threads);
        std::mem::take(&mut s.fail_next_init)
    });
    if fail_now {
        fail(err, ffi::LP_ERR_INFERENCE, "no accelerator backend registered");
        return ffi::LP_ERR_INFERENCE;
    }
    ffi::LP_OK
}

fn parse_module(bytes: &[u8]) -> Option<FakeModule> {
    let text = std::str::from_utf8(bytes).ok()?;
    let spec = text.strip_prefix("fake-lite:")?;
    let (op, expect_len) = match spec.split_once('@') {
        Some((op, len)) => (op, Some(len.parse().ok()?)),
        None => (spec, None),
    };
    matches!(op, "neg" | "identity" | "transpose" | "split" | "throw").then(|| FakeModule {
        op: op.to_string(),
        expect_len,
    })
}

unsafe fn new_module(bytes: &[u8], err: *mut LpError) -> *mut LpModule {
    match parse_module(bytes) {
        Some(module) => {
            with_state(|s| s.live.modules += 1);
            Box::into_raw(Box::new(module)).cast()
        }
        None => {
            fail(
                err,
                ffi::LP_ERR_LOAD,
                "PytorchStreamReader failed reading zip archive: failed finding central directory",
            );
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn module_load_file(path: *const c_char, err: *mut LpError) -> *mut LpModule {
    let path = CStr::from_ptr(path).to_string_lossy().into_owned();
    match std::fs::read(&path) {
        Ok(bytes) => new_module(&bytes, err),
        Err(e) => {
            fail(err, ffi::LP_ERR_LOAD, &format!("open file failed for {path}: {e}"));
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn module_load_buffer(data: *const u8, len: usize, err: *mut LpError) -> *mut LpModule {
    let bytes = if len == 0 { &[][..] } else { std::slice::from_raw_parts(data, len) };
    new_module(bytes, err)
}

unsafe extern "C" fn module_release(module: *mut LpModule) {
    drop(Box::from_raw(module.cast::<FakeModule>()));
    with_state(|s| s.live.modules -= 1);
}

unsafe extern "C" fn module_has_method(_module: *const LpModule, name: *const c_char) -> bool {
    matches!(CStr::from_ptr(name).to_bytes(), b"forward" | b"identity")
}

unsafe extern "C" fn module_run_method(
    module: *mut LpModule,
    method: *const c_char,
    inputs: *const *mut LpTensor,
    num_inputs: usize,
    err: *mut LpError,
) -> *mut LpOutputs {
    let module = &*module.cast::<FakeModule>();
    let method = CStr::from_ptr(method).to_string_lossy();
    let inputs: Vec<&FakeTensor> = if num_inputs == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(inputs, num_inputs)
            .iter()
            .map(|t| &*t.cast::<FakeTensor>())
            .collect()
    };

    match run(module, &method, &inputs) {
        Ok(tensors) => {
            with_state(|s| s.live.outputs += 1);
            Box::into_raw(Box::new(FakeOutputs { tensors })).cast()
        }
        Err((status, message)) => {
            fail(err, status, &message);
            std::ptr::null_mut()
        }
    }
}

fn run(module: &FakeModule, method: &str, inputs: &[&FakeTensor]) -> Result<Vec<FakeTensor>, (i32, String)> {
    let op = match method {
        "forward" => module.op.as_str(),
        "identity" => "identity",
        other => {
            return Err((
                ffi::LP_ERR_INFERENCE,
                format!("Method '{other}' is not defined"),
            ))
        }
    };
    let [x] = inputs else {
        return Err((
            ffi::LP_ERR_SHAPE,
            format!("{method}() expected 1 argument(s), got {}", inputs.len()),
        ));
    };
    if let (Some(n), "forward") = (module.expect_len, method) {
        if x.shape != [n] {
            return Err((
                ffi::LP_ERR_SHAPE,
                format!("The size of tensor a ({n}) must match the size of tensor b ({:?})", x.shape),
            ));
        }
    }

    match op {
        "identity" => Ok(vec![(*x).clone()]),
        "split" => Ok(vec![(*x).clone(), (*x).clone()]),
        "neg" => negate(x).map(|t| vec![t]),
        "transpose" => match (x.shape.as_slice(), x.strides.as_slice()) {
            ([r, c], [sr, sc]) => Ok(vec![FakeTensor {
                shape: vec![*c, *r],
                strides: vec![*sc, *sr],
                ..(*x).clone()
            }]),
            _ => Err((ffi::LP_ERR_SHAPE, "transpose expects a 2-D tensor".to_string())),
        },
        _ => Err((
            ffi::LP_ERR_INFERENCE,
            "c10::Error: The following operation failed in the TorchScript interpreter".to_string(),
        )),
    }
}

fn negate(x: &FakeTensor) -> Result<FakeTensor, (i32, String)> {
    fn map<const N: usize>(data: &[u8], f: impl Fn([u8; N]) -> [u8; N]) -> Vec<u8> {
        data.chunks_exact(N)
            .flat_map(|c| {
                let mut b = [0u8; N];
                b.copy_from_slice(c);
                f(b)
            })
            .collect()
    }

    let data = match x.dtype {
        ffi::LP_DTYPE_F32 => map::<4>(&x.storage, |b| (-f32::from_le_bytes(b)).to_le_bytes()),
        ffi::LP_DTYPE_F64 => map::<8>(&x.storage, |b| (-f64::from_le_bytes(b)).to_le_bytes()),
        ffi::LP_DTYPE_I32 => map::<4>(&x.storage, |b| i32::from_le_bytes(b).wrapping_neg().to_le_bytes()),
        ffi::LP_DTYPE_I64 => map::<8>(&x.storage, |b| i64::from_le_bytes(b).wrapping_neg().to_le_bytes()),
        _ => {
            return Err((
                ffi::LP_ERR_INFERENCE,
                "\"neg_cpu\" not implemented for this scalar type".to_string(),
            ))
        }
    };
    Ok(FakeTensor {
        storage: Arc::new(data),
        ..x.clone()
    })
}

unsafe extern "C" fn tensor_create(
    dtype: i32,
    shape: *const i64,
    ndim: usize,
    data: *const u8,
    nbytes: usize,
    err: *mut LpError,
) -> *mut LpTensor {
    let Some(size) = elem_size(dtype).filter(|_| !with_state(|s| s.rejected.contains(&dtype))) else {
        fail(err, ffi::LP_ERR_DTYPE, &format!("Unsupported scalar type {dtype}"));
        return std::ptr::null_mut();
    };
    let shape: Vec<i64> = if ndim == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(shape, ndim).to_vec()
    };
    let numel: i64 = shape.iter().product();
    if numel as usize * size != nbytes {
        fail(err, ffi::LP_ERR_SHAPE, "buffer does not match shape");
        return std::ptr::null_mut();
    }

    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    let storage = if nbytes == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(data, nbytes).to_vec()
    };

    with_state(|s| s.live.tensors += 1);
    Box::into_raw(Box::new(FakeTensor {
        dtype,
        shape,
        strides,
        storage: Arc::new(storage),
    }))
    .cast()
}

unsafe extern "C" fn tensor_release(tensor: *mut LpTensor) {
    drop(Box::from_raw(tensor.cast::<FakeTensor>()));
    with_state(|s| s.live.tensors -= 1);
}

unsafe fn tensor<'a>(t: *const LpTensor) -> &'a FakeTensor {
    &*t.cast::<FakeTensor>()
}

unsafe extern "C" fn tensor_dtype(t: *const LpTensor) -> i32 {
    tensor(t).dtype
}

unsafe extern "C" fn tensor_ndim(t: *const LpTensor) -> usize {
    tensor(t).shape.len()
}

unsafe extern "C" fn tensor_shape(t: *const LpTensor) -> *const i64 {
    tensor(t).shape.as_ptr()
}

unsafe extern "C" fn tensor_strides(t: *const LpTensor) -> *const i64 {
    tensor(t).strides.as_ptr()
}

unsafe extern "C" fn tensor_data(t: *const LpTensor) -> *const u8 {
    tensor(t).storage.as_ptr()
}

unsafe extern "C" fn tensor_nbytes(t: *const LpTensor) -> usize {
    tensor(t).storage.len()
}

unsafe extern "C" fn outputs_len(outputs: *const LpOutputs) -> usize {
    (*outputs.cast::<FakeOutputs>()).tensors.len()
}

unsafe extern "C" fn outputs_get(outputs: *const LpOutputs, index: usize) -> *const LpTensor {
    match (&(*outputs.cast::<FakeOutputs>()).tensors).get(index) {
        Some(t) => (t as *const FakeTensor).cast(),
        None => std::ptr::null(),
    }
}

unsafe extern "C" fn outputs_release(outputs: *mut LpOutputs) {
    drop(Box::from_raw(outputs.cast::<FakeOutputs>()));
    with_state(|s| s.live.outputs -= 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_buffers() {
        let m = parse_module(&model("neg@3")).map(|m| (m.op, m.expect_len));
        assert_eq!(m, Some(("neg".to_string(), Some(3))));
        assert!(parse_module(b"fake-lite:conv").is_none());
        assert!(parse_module(b"\x80\x02").is_none());
    }
}
