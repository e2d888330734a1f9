//! In-process stand-in for a native runtime.
//!
//! `MockBackend` behaves like a real binding from the engine's point of
//! view: it has a process-wide initialization step, parses a model format,
//! owns native tensors with their own storage, and can produce strided
//! views, failures and panics on demand. Counters in [`MockStats`] let tests
//! observe native calls and native object lifetimes.
//!
//! Model files are UTF-8 text of the form `liteport-mock:<op>[@<dims>]`,
//! e.g. `liteport-mock:neg@3` (negate one input that must have shape `[3]`)
//! or `liteport-mock:transpose`. Ops: `neg`, `identity`, `transpose`,
//! `panic`, `fail`.
//!
//! ```rust,ignore
//! use liteport_core::testing::MockBackend;
//!
//! let backend = MockBackend::new();
//! let stats = backend.stats();
//! let engine = InferenceEngine::new(backend);
//! let model = engine.load_bytes(MockBackend::model("neg@3"))?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::layout::{contiguous_strides, copy_strided};
use crate::{
    Backend, BackendCapabilities, BackendModel, DType, EngineConfig, Error, IOName, ModelSource,
    ModelSpec, Result, Tensor, TensorAdapter, TensorSpec, FORWARD,
};

const MAGIC: &str = "liteport-mock:";

/// Observable counters shared by a backend and everything it creates.
#[derive(Debug, Default)]
pub struct MockStats {
    initializations: AtomicUsize,
    loads: AtomicUsize,
    live_models: AtomicUsize,
    live_tensors: AtomicUsize,
    native_calls: AtomicUsize,
}

impl MockStats {
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn live_models(&self) -> usize {
        self.live_models.load(Ordering::SeqCst)
    }

    pub fn live_tensors(&self) -> usize {
        self.live_tensors.load(Ordering::SeqCst)
    }

    /// Forward passes that reached the runtime.
    pub fn native_calls(&self) -> usize {
        self.native_calls.load(Ordering::SeqCst)
    }
}

pub struct MockBackend {
    stats: Arc<MockStats>,
    supported: Vec<DType>,
    init_failures: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MockStats::default()),
            supported: DType::ALL.to_vec(),
            init_failures: AtomicUsize::new(0),
        }
    }

    /// Model file contents for `spec`, e.g. `MockBackend::model("neg@2x2")`.
    pub fn model(spec: &str) -> Vec<u8> {
        format!("{MAGIC}{spec}").into_bytes()
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    /// Pretend the runtime has no kernels for `dtype`.
    pub fn without_dtype(mut self, dtype: DType) -> Self {
        self.supported.retain(|d| *d != dtype);
        self
    }

    /// Make the next `times` initializations fail.
    pub fn failing_init(self, times: usize) -> Self {
        self.init_failures.store(times, Ordering::SeqCst);
        self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    type Model = MockModel;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&self, _config: &EngineConfig) -> Result<()> {
        self.stats.initializations.fetch_add(1, Ordering::SeqCst);
        let pending = self.init_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.init_failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Inference("mock runtime bootstrap failed".into()));
        }
        Ok(())
    }

    fn load(&self, source: &ModelSource, _config: &EngineConfig) -> Result<MockModel> {
        let bytes = match source {
            ModelSource::Path(path) => std::fs::read(path)
                .map_err(|e| Error::ModelLoad(format!("cannot read {}: {e}", path.display())))?,
            ModelSource::Bytes(bytes) => bytes.to_vec(),
        };
        let (op, expected) = parse_model(&bytes)?;

        let spec = ModelSpec {
            inputs: expected
                .iter()
                .map(|dims| TensorSpec {
                    name: IOName("input0".into()),
                    dtype: None,
                    dims: dims.iter().copied().map(Some).collect(),
                })
                .collect(),
            outputs: Vec::new(),
            methods: vec![FORWARD.to_string()],
        };

        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        self.stats.live_models.fetch_add(1, Ordering::SeqCst);
        Ok(MockModel {
            op,
            expected,
            spec,
            adapter: MockAdapter {
                supported: self.supported.clone(),
                stats: Arc::clone(&self.stats),
            },
            stats: Arc::clone(&self.stats),
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            named_methods: false,
            introspects_signature: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MockOp {
    Negate,
    Identity,
    Transpose,
    Panic,
    Fail,
}

fn parse_model(bytes: &[u8]) -> Result<(MockOp, Option<Vec<usize>>)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::ModelLoad("model is not a mock model (not UTF-8)".into()))?;
    let body = text
        .trim()
        .strip_prefix(MAGIC)
        .ok_or_else(|| Error::ModelLoad("unrecognized model format".into()))?;

    let (op, dims) = match body.split_once('@') {
        Some((op, dims)) => (op, Some(dims)),
        None => (body, None),
    };
    let op = match op {
        "neg" => MockOp::Negate,
        "identity" => MockOp::Identity,
        "transpose" => MockOp::Transpose,
        "panic" => MockOp::Panic,
        "fail" => MockOp::Fail,
        other => return Err(Error::ModelLoad(format!("unsupported operator `{other}`"))),
    };
    let expected = dims
        .map(|dims| {
            dims.split('x')
                .map(|d| {
                    d.parse::<usize>()
                        .map_err(|_| Error::ModelLoad(format!("corrupt input shape `{dims}`")))
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    Ok((op, expected))
}

/// A tensor living in mock "native" memory, possibly a strided view.
pub struct MockNativeTensor {
    dtype: DType,
    dims: Vec<usize>,
    strides: Vec<usize>,
    storage: Arc<Vec<u8>>,
    stats: Arc<MockStats>,
}

impl MockNativeTensor {
    fn new(dtype: DType, dims: Vec<usize>, storage: Arc<Vec<u8>>, stats: &Arc<MockStats>) -> Self {
        stats.live_tensors.fetch_add(1, Ordering::SeqCst);
        Self {
            dtype,
            strides: contiguous_strides(&dims),
            dims,
            storage,
            stats: Arc::clone(stats),
        }
    }

    fn contiguous(&self) -> Result<Vec<u8>> {
        copy_strided(&self.dims, &self.strides, self.dtype.size_bytes(), &self.storage)
    }
}

impl Drop for MockNativeTensor {
    fn drop(&mut self) {
        self.stats.live_tensors.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockAdapter {
    supported: Vec<DType>,
    stats: Arc<MockStats>,
}

impl TensorAdapter for MockAdapter {
    type Native = MockNativeTensor;

    fn supports(&self, dtype: DType) -> bool {
        self.supported.contains(&dtype)
    }

    fn to_native(&self, tensor: &Tensor) -> Result<MockNativeTensor> {
        self.ensure_supported(tensor.dtype())?;
        Ok(MockNativeTensor::new(
            tensor.dtype(),
            tensor.shape().dims().to_vec(),
            Arc::new(tensor.data().to_vec()),
            &self.stats,
        ))
    }

    fn from_native(&self, native: &MockNativeTensor) -> Result<Tensor> {
        Tensor::new(native.dtype, native.dims.clone(), native.contiguous()?)
    }
}

pub struct MockModel {
    op: MockOp,
    expected: Option<Vec<usize>>,
    spec: ModelSpec,
    adapter: MockAdapter,
    stats: Arc<MockStats>,
}

impl MockModel {
    fn execute(&self, inputs: &[MockNativeTensor]) -> Result<Vec<MockNativeTensor>> {
        if let Some(expected) = &self.expected {
            if inputs.len() != 1 {
                return Err(Error::ShapeMismatch(format!(
                    "forward() takes 1 input, got {}",
                    inputs.len()
                )));
            }
            if &inputs[0].dims != expected {
                return Err(Error::ShapeMismatch(format!(
                    "input 0 has shape {:?}, model expects {:?}",
                    inputs[0].dims, expected
                )));
            }
        }

        match self.op {
            MockOp::Negate => inputs
                .iter()
                .map(|t| {
                    let data = negate(t.dtype, &t.contiguous()?)?;
                    Ok(MockNativeTensor::new(t.dtype, t.dims.clone(), Arc::new(data), &self.stats))
                })
                .collect(),
            MockOp::Identity => inputs
                .iter()
                .map(|t| {
                    Ok(MockNativeTensor::new(
                        t.dtype,
                        t.dims.clone(),
                        Arc::new(t.contiguous()?),
                        &self.stats,
                    ))
                })
                .collect(),
            MockOp::Transpose => inputs
                .iter()
                .map(|t| {
                    if t.dims.len() != 2 {
                        return Err(Error::ShapeMismatch(format!(
                            "transpose expects a 2-D input, got {} dims",
                            t.dims.len()
                        )));
                    }
                    // A view over the input's storage with swapped strides.
                    self.stats.live_tensors.fetch_add(1, Ordering::SeqCst);
                    Ok(MockNativeTensor {
                        dtype: t.dtype,
                        dims: vec![t.dims[1], t.dims[0]],
                        strides: vec![t.strides[1], t.strides[0]],
                        storage: Arc::clone(&t.storage),
                        stats: Arc::clone(&self.stats),
                    })
                })
                .collect(),
            MockOp::Panic => panic!("mock kernel fault"),
            MockOp::Fail => Err(Error::Inference("mock runtime rejected the graph".into())),
        }
    }
}

impl BackendModel for MockModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, method: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.stats.native_calls.fetch_add(1, Ordering::SeqCst);
        if method != FORWARD {
            return Err(Error::Inference(format!("method `{method}` not found")));
        }

        let natives = inputs
            .iter()
            .map(|t| self.adapter.to_native(t))
            .collect::<Result<Vec<_>>>()?;
        let outputs = self.execute(&natives)?;
        outputs.iter().map(|o| self.adapter.from_native(o)).collect()
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.stats.live_models.fetch_sub(1, Ordering::SeqCst);
    }
}

fn negate(dtype: DType, data: &[u8]) -> Result<Vec<u8>> {
    Ok(match dtype {
        DType::F32 => map_chunks::<4>(data, |b| (-f32::from_le_bytes(b)).to_le_bytes()),
        DType::F64 => map_chunks::<8>(data, |b| (-f64::from_le_bytes(b)).to_le_bytes()),
        DType::I32 => map_chunks::<4>(data, |b| i32::from_le_bytes(b).wrapping_neg().to_le_bytes()),
        DType::I64 => map_chunks::<8>(data, |b| i64::from_le_bytes(b).wrapping_neg().to_le_bytes()),
        DType::U8 | DType::Bool => {
            return Err(Error::Inference(format!("neg is not implemented for {dtype}")))
        }
    })
}

fn map_chunks<const N: usize>(data: &[u8], f: impl Fn([u8; N]) -> [u8; N]) -> Vec<u8> {
    data.chunks_exact(N)
        .flat_map(|chunk| {
            let mut b = [0u8; N];
            b.copy_from_slice(chunk);
            f(b)
        })
        .collect()
}
