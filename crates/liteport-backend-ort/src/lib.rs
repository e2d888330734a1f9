//! ONNX Runtime binding.
//!
//! Sessions and values are owned Rust objects that release their native
//! memory on drop; runtime failures arrive as `ort::Error` and are mapped
//! onto the liteport error kinds here.

use liteport_core::{
    Backend, BackendCapabilities, BackendModel, DType, Element, EngineConfig, Error, IOName,
    ModelSource, ModelSpec, OptimizationLevel, Result, Tensor, TensorAdapter, TensorSpec, FORWARD,
};
use ort::{
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session, SessionInputValue,
    },
    tensor::{PrimitiveTensorElementType, TensorElementType},
    value::{DynValue, ValueType},
};
use tracing::debug;

pub struct OrtBackend;

impl OrtBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OrtModel {
    spec: ModelSpec,
    session: Session,
    input_names: Vec<String>,
    adapter: OrtTensorAdapter,
}

impl Backend for OrtBackend {
    type Model = OrtModel;

    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn initialize(&self, _config: &EngineConfig) -> Result<()> {
        ort::init()
            .with_name("liteport")
            .commit()
            .map_err(load_err("failed to initialize ONNX Runtime"))?;
        Ok(())
    }

    fn load(&self, source: &ModelSource, config: &EngineConfig) -> Result<Self::Model> {
        let builder = Session::builder()
            .map_err(load_err("failed to create ORT session builder"))?
            .with_optimization_level(optimization_level(config.optimization))
            .map_err(load_err("failed to configure ORT session builder"))?
            .with_intra_threads(config.resolve_threads())
            .map_err(load_err("failed to configure ORT session builder"))?;

        let builder = configure_execution_providers(builder)?;

        let session = match source {
            ModelSource::Path(path) => builder.commit_from_file(path),
            ModelSource::Bytes(bytes) => builder.commit_from_memory(&bytes[..]),
        }
        .map_err(|e| {
            Error::ModelLoad(format!("failed to load ONNX model {}: {e}", source.describe()))
        })?;

        let input_names = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let spec = build_model_spec(&session);
        debug!(inputs = ?spec.inputs, outputs = ?spec.outputs, "ORT session ready");

        Ok(OrtModel {
            spec,
            session,
            input_names,
            adapter: OrtTensorAdapter,
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            named_methods: false,
            introspects_signature: true,
        }
    }
}

impl BackendModel for OrtModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, method: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        if method != FORWARD {
            return Err(Error::Inference(format!(
                "ONNX models only expose `{FORWARD}`, not `{method}`"
            )));
        }
        // Inputs are bound by name, so the count has to line up before binding.
        if inputs.len() != self.input_names.len() {
            return Err(Error::ShapeMismatch(format!(
                "expected {} inputs, got {}",
                self.input_names.len(),
                inputs.len()
            )));
        }

        let mut ort_inputs = Vec::with_capacity(inputs.len());
        for (name, input) in self.input_names.iter().zip(inputs) {
            let value = self.adapter.to_native(input)?;
            ort_inputs.push((name.clone(), SessionInputValue::from(value)));
        }

        let outputs = self
            .session
            .run(ort_inputs)
            .map_err(|e| Error::Inference(e.to_string()))?;

        let mut out_tensors = Vec::with_capacity(outputs.len());
        for (_, value) in outputs.iter() {
            out_tensors.push(self.adapter.from_native(&value)?);
        }

        Ok(out_tensors)
    }
}

/// Converts between liteport tensors and ORT values.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrtTensorAdapter;

impl TensorAdapter for OrtTensorAdapter {
    type Native = DynValue;

    fn supports(&self, _dtype: DType) -> bool {
        true
    }

    fn to_native(&self, tensor: &Tensor) -> Result<DynValue> {
        self.ensure_supported(tensor.dtype())?;
        match tensor.dtype() {
            DType::F32 => owned_value::<f32>(tensor),
            DType::F64 => owned_value::<f64>(tensor),
            DType::I32 => owned_value::<i32>(tensor),
            DType::I64 => owned_value::<i64>(tensor),
            DType::U8 => owned_value::<u8>(tensor),
            DType::Bool => owned_value::<bool>(tensor),
        }
    }

    fn from_native(&self, value: &DynValue) -> Result<Tensor> {
        let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
            return Err(Error::UnsupportedDType(
                "non-tensor outputs are not supported".to_string(),
            ));
        };

        let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();

        match *ty {
            TensorElementType::Float32 => extract::<f32>(value, dims),
            TensorElementType::Float64 => extract::<f64>(value, dims),
            TensorElementType::Int32 => extract::<i32>(value, dims),
            TensorElementType::Int64 => extract::<i64>(value, dims),
            TensorElementType::Uint8 => extract::<u8>(value, dims),
            TensorElementType::Bool => extract::<bool>(value, dims),
            _ => Err(Error::UnsupportedDType(format!(
                "runtime produced a {ty} tensor"
            ))),
        }
    }
}

/// Decodes into an owned buffer that the ORT value takes over.
fn owned_value<T>(tensor: &Tensor) -> Result<DynValue>
where
    T: Element + PrimitiveTensorElementType + std::fmt::Debug,
{
    let shape: Vec<usize> = tensor.shape().dims().to_vec();
    let data = tensor.to_vec::<T>()?;
    let value = ort::value::Tensor::from_array((shape, data))
        .map_err(|e| Error::Inference(format!("failed to allocate native tensor: {e}")))?;
    Ok(value.into_dyn())
}

fn extract<T>(value: &DynValue, dims: Vec<usize>) -> Result<Tensor>
where
    T: Element + PrimitiveTensorElementType + std::fmt::Debug,
{
    let array = value
        .try_extract_array::<T>()
        .map_err(|e| Error::Inference(format!("failed to read output tensor: {e}")))?;
    // The view iterates in logical row-major order, whatever its strides.
    Tensor::from_iter_exact(dims, array.iter().copied())
}

fn build_model_spec(session: &Session) -> ModelSpec {
    let inputs = session
        .inputs
        .iter()
        .map(|input| tensor_spec_from_value_type(&input.name, &input.input_type))
        .collect();

    let outputs = session
        .outputs
        .iter()
        .map(|output| tensor_spec_from_value_type(&output.name, &output.output_type))
        .collect();

    ModelSpec {
        inputs,
        outputs,
        methods: vec![FORWARD.to_string()],
    }
}

fn tensor_spec_from_value_type(name: &str, value_type: &ValueType) -> TensorSpec {
    let (dtype, dims) = match value_type {
        ValueType::Tensor { ty, shape, .. } => (
            ort_tensor_element_to_dtype(*ty),
            shape
                .iter()
                .map(|d| if *d < 0 { None } else { Some(*d as usize) })
                .collect(),
        ),
        _ => (None, Vec::new()),
    };

    TensorSpec {
        name: IOName(name.to_string()),
        dtype,
        dims,
    }
}

fn ort_tensor_element_to_dtype(ty: TensorElementType) -> Option<DType> {
    match ty {
        TensorElementType::Float32 => Some(DType::F32),
        TensorElementType::Float64 => Some(DType::F64),
        TensorElementType::Int32 => Some(DType::I32),
        TensorElementType::Int64 => Some(DType::I64),
        TensorElementType::Uint8 => Some(DType::U8),
        TensorElementType::Bool => Some(DType::Bool),
        _ => None,
    }
}

fn optimization_level(level: OptimizationLevel) -> GraphOptimizationLevel {
    match level {
        OptimizationLevel::Disabled => GraphOptimizationLevel::Disable,
        OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
        OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
        OptimizationLevel::All => GraphOptimizationLevel::Level3,
    }
}

fn configure_execution_providers(builder: SessionBuilder) -> Result<SessionBuilder> {
    #[cfg(feature = "nnapi")]
    let builder = {
        use ort::execution_providers::NNAPIExecutionProvider;
        builder
            .with_execution_providers([NNAPIExecutionProvider::default().build()])
            .map_err(load_err("failed to enable ORT NNAPI execution provider"))?
    };

    #[cfg(feature = "coreml")]
    let builder = {
        use ort::execution_providers::CoreMLExecutionProvider;
        builder
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
            .map_err(load_err("failed to enable ORT CoreML execution provider"))?
    };

    Ok(builder)
}

fn load_err(context: &'static str) -> impl Fn(ort::Error) -> Error {
    move |e| Error::ModelLoad(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_round_trip_covers_every_dtype() -> liteport_core::Result<()> {
        let adapter = OrtTensorAdapter;
        let tensors = [
            Tensor::from_slice([2, 3], &[1.0f32, -2.0, 3.5, 0.0, f32::MAX, -1e-7])?,
            Tensor::from_slice([2], &[1.25f64, -8.0])?,
            Tensor::from_slice([1, 2], &[i32::MIN, i32::MAX])?,
            Tensor::scalar(-42i64),
            Tensor::from_slice([4], &[0u8, 1, 128, 255])?,
            Tensor::from_slice([2, 1], &[true, false])?,
            Tensor::new(DType::Bool, [3], vec![0u8, 1, 5])?,
        ];
        for t in &tensors {
            let native = adapter.to_native(t)?;
            assert_eq!(&adapter.from_native(&native)?, t);
        }
        Ok(())
    }

    #[test]
    fn optimization_levels_map_monotonically() {
        assert!(matches!(
            optimization_level(OptimizationLevel::Disabled),
            GraphOptimizationLevel::Disable
        ));
        assert!(matches!(
            optimization_level(OptimizationLevel::All),
            GraphOptimizationLevel::Level3
        ));
    }
}
