//! UniFFI surface of liteport for Kotlin and Swift.
//!
//! Tensors cross the boundary as [`TensorRecord`]s (dtype, shape and the
//! raw little-endian buffer); the typed `tensor_from_*` / `tensor_to_*`
//! helpers build and read them without callers touching byte order.

use std::sync::Arc;

use liteport_core::{
    DType, EngineConfig, Error, ErrorKind, InferenceEngine, ModelHandle, Tensor, FORWARD,
};
use tracing::debug;

uniffi::setup_scaffolding!();

/// Failure reported to Kotlin/Swift; one variant per liteport error kind.
#[derive(uniffi::Error, thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LiteError {
    #[error("model load failed: {message}")]
    ModelLoad { message: String },
    #[error("model handle has been released")]
    HandleReleased,
    #[error("unsupported dtype: {message}")]
    UnsupportedDType { message: String },
    #[error("shape mismatch: {message}")]
    ShapeMismatch { message: String },
    #[error("inference failed: {message}")]
    Inference { message: String },
}

impl From<Error> for LiteError {
    fn from(err: Error) -> Self {
        let message = err.message();
        match err.kind() {
            ErrorKind::ModelLoad => LiteError::ModelLoad { message },
            ErrorKind::HandleReleased => LiteError::HandleReleased,
            ErrorKind::UnsupportedDType => LiteError::UnsupportedDType { message },
            ErrorKind::ShapeMismatch => LiteError::ShapeMismatch { message },
            ErrorKind::Inference => LiteError::Inference { message },
        }
    }
}

#[derive(uniffi::Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorDType {
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl From<DType> for TensorDType {
    fn from(d: DType) -> Self {
        match d {
            DType::F32 => TensorDType::F32,
            DType::F64 => TensorDType::F64,
            DType::I32 => TensorDType::I32,
            DType::I64 => TensorDType::I64,
            DType::U8 => TensorDType::U8,
            DType::Bool => TensorDType::Bool,
        }
    }
}

impl From<TensorDType> for DType {
    fn from(d: TensorDType) -> Self {
        match d {
            TensorDType::F32 => DType::F32,
            TensorDType::F64 => DType::F64,
            TensorDType::I32 => DType::I32,
            TensorDType::I64 => DType::I64,
            TensorDType::U8 => DType::U8,
            TensorDType::Bool => DType::Bool,
        }
    }
}

/// A tensor as seen from Kotlin/Swift.
///
/// `data` is row-major little-endian, one byte per element for `Bool`.
#[derive(uniffi::Record, Debug, Clone, PartialEq)]
pub struct TensorRecord {
    pub dtype: TensorDType,
    pub shape: Vec<u64>,
    pub data: Vec<u8>,
}

impl TryFrom<TensorRecord> for Tensor {
    type Error = Error;

    fn try_from(record: TensorRecord) -> Result<Self, Error> {
        let shape = record
            .shape
            .iter()
            .map(|d| {
                usize::try_from(*d)
                    .map_err(|_| Error::ShapeMismatch(format!("dimension {d} is too large")))
            })
            .collect::<Result<Vec<usize>, Error>>()?;
        Tensor::new(record.dtype.into(), shape, record.data)
    }
}

impl From<Tensor> for TensorRecord {
    fn from(tensor: Tensor) -> Self {
        let (dtype, shape, data) = tensor.into_parts();
        TensorRecord {
            dtype: dtype.into(),
            shape: shape.dims().iter().map(|d| *d as u64).collect(),
            data: data.to_vec(),
        }
    }
}

/// Native runtime a [`LiteEngine`] drives.
#[derive(uniffi::Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// ONNX Runtime (`.onnx` / `.ort` models).
    OnnxRuntime,
    /// The C++ lite interpreter (`.ptl` models), through the linked shim.
    NativeBridge,
}

/// Loads models for one runtime. Runtime setup happens on the first load.
#[derive(uniffi::Object)]
pub struct LiteEngine {
    engine: InferenceEngine,
}

#[uniffi::export]
impl LiteEngine {
    /// `num_threads` of `None` (or 0) lets the runtime use every core.
    #[uniffi::constructor]
    pub fn new(runtime: RuntimeKind, num_threads: Option<u32>) -> Result<Arc<Self>, LiteError> {
        let mut config = EngineConfig::default();
        config.num_threads = num_threads.map(|n| n as usize);

        let engine = match runtime {
            RuntimeKind::OnnxRuntime => {
                InferenceEngine::with_config(liteport_backend_ort::OrtBackend::new(), config)
            }
            RuntimeKind::NativeBridge => native_bridge_engine(config)?,
        };
        Ok(Arc::new(Self::from_engine(engine)))
    }

    pub fn runtime_name(&self) -> String {
        self.engine.backend_name().to_string()
    }

    pub fn load_model_file(&self, path: String) -> Result<Arc<LiteModel>, LiteError> {
        let handle = self.engine.load_file(&path)?;
        Ok(Arc::new(LiteModel { handle }))
    }

    pub fn load_model_bytes(&self, bytes: Vec<u8>) -> Result<Arc<LiteModel>, LiteError> {
        let handle = self.engine.load_bytes(bytes)?;
        Ok(Arc::new(LiteModel { handle }))
    }
}

impl LiteEngine {
    pub fn from_engine(engine: InferenceEngine) -> Self {
        Self { engine }
    }
}

#[cfg(feature = "native-bridge")]
fn native_bridge_engine(config: EngineConfig) -> Result<InferenceEngine, LiteError> {
    let backend = liteport_backend_bridge::BridgeBackend::linked()?;
    Ok(InferenceEngine::with_config(backend, config))
}

#[cfg(not(feature = "native-bridge"))]
fn native_bridge_engine(_config: EngineConfig) -> Result<InferenceEngine, LiteError> {
    Err(LiteError::ModelLoad {
        message: "this library was built without the native bridge".to_string(),
    })
}

/// A loaded model.
///
/// Hosts must call [`LiteModel::release`] (or `close()`/`destroy()` on the
/// generated object) when done, which frees the native model at that point.
/// Collection of the last reference also frees it, but only on the
/// collector's schedule; that path is a safety net, not a release strategy.
#[derive(uniffi::Object)]
pub struct LiteModel {
    handle: ModelHandle,
}

#[uniffi::export]
impl LiteModel {
    pub fn run(&self, inputs: Vec<TensorRecord>) -> Result<Vec<TensorRecord>, LiteError> {
        self.run_method(FORWARD.to_string(), inputs)
    }

    pub fn run_method(
        &self,
        method: String,
        inputs: Vec<TensorRecord>,
    ) -> Result<Vec<TensorRecord>, LiteError> {
        let inputs = inputs
            .into_iter()
            .map(Tensor::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self.handle.run_method(&method, &inputs)?;
        debug!(handle = self.handle.id(), method, "returning outputs to host");
        Ok(outputs.into_iter().map(TensorRecord::from).collect())
    }

    pub fn release(&self) {
        self.handle.release();
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Methods known to exist on the model. The lite interpreter cannot
    /// enumerate its methods, so with `NativeBridge` this is only `forward`;
    /// other names can still be called through `run_method`.
    pub fn methods(&self) -> Vec<String> {
        self.handle.spec().methods.clone()
    }
}

fn record<T: liteport_core::Element>(shape: Vec<u64>, values: &[T]) -> Result<TensorRecord, LiteError> {
    let shape = shape
        .into_iter()
        .map(|d| usize::try_from(d).map_err(|_| Error::ShapeMismatch(format!("dimension {d} is too large"))))
        .collect::<Result<Vec<usize>, Error>>()?;
    Ok(Tensor::from_slice(shape, values)?.into())
}

fn values<T: liteport_core::Element>(record: TensorRecord) -> Result<Vec<T>, LiteError> {
    Ok(Tensor::try_from(record)?.to_vec::<T>()?)
}

#[uniffi::export]
pub fn tensor_from_f32(shape: Vec<u64>, values: Vec<f32>) -> Result<TensorRecord, LiteError> {
    record(shape, &values)
}

#[uniffi::export]
pub fn tensor_from_f64(shape: Vec<u64>, values: Vec<f64>) -> Result<TensorRecord, LiteError> {
    record(shape, &values)
}

#[uniffi::export]
pub fn tensor_from_i32(shape: Vec<u64>, values: Vec<i32>) -> Result<TensorRecord, LiteError> {
    record(shape, &values)
}

#[uniffi::export]
pub fn tensor_from_i64(shape: Vec<u64>, values: Vec<i64>) -> Result<TensorRecord, LiteError> {
    record(shape, &values)
}

#[uniffi::export]
pub fn tensor_from_u8(shape: Vec<u64>, values: Vec<u8>) -> Result<TensorRecord, LiteError> {
    record(shape, &values)
}

#[uniffi::export]
pub fn tensor_from_bool(shape: Vec<u64>, values: Vec<bool>) -> Result<TensorRecord, LiteError> {
    record(shape, &values)
}

#[uniffi::export]
pub fn tensor_to_f32(tensor: TensorRecord) -> Result<Vec<f32>, LiteError> {
    values(tensor)
}

#[uniffi::export]
pub fn tensor_to_f64(tensor: TensorRecord) -> Result<Vec<f64>, LiteError> {
    values(tensor)
}

#[uniffi::export]
pub fn tensor_to_i32(tensor: TensorRecord) -> Result<Vec<i32>, LiteError> {
    values(tensor)
}

#[uniffi::export]
pub fn tensor_to_i64(tensor: TensorRecord) -> Result<Vec<i64>, LiteError> {
    values(tensor)
}

#[uniffi::export]
pub fn tensor_to_u8(tensor: TensorRecord) -> Result<Vec<u8>, LiteError> {
    values(tensor)
}

#[uniffi::export]
pub fn tensor_to_bool(tensor: TensorRecord) -> Result<Vec<bool>, LiteError> {
    values(tensor)
}
