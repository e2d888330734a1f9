use crate::{DType, EngineConfig, Error, ModelSource, ModelSpec, Result, Tensor};

/// Name of the entry point every lite model exposes.
pub const FORWARD: &str = "forward";

#[derive(Clone, Copy, Debug)]
pub struct BackendCapabilities {
    /// Methods other than `forward` can be invoked by name.
    pub named_methods: bool,
    /// Input/output signatures are reported in [`ModelSpec`].
    pub introspects_signature: bool,
}

/// One native runtime binding.
pub trait Backend: Send + Sync + 'static {
    type Model: BackendModel;

    fn name(&self) -> &'static str;

    /// Process-wide runtime setup. The engine calls this once before the
    /// first load and calls it again on the next load if it failed.
    fn initialize(&self, config: &EngineConfig) -> Result<()>;

    fn load(&self, source: &ModelSource, config: &EngineConfig) -> Result<Self::Model>;

    fn capabilities(&self) -> BackendCapabilities;
}

/// A loaded native model. Not required to be reentrant; callers hold it
/// behind `&mut`.
pub trait BackendModel: Send + 'static {
    fn spec(&self) -> &ModelSpec;

    /// Runs `method` with `inputs` bound in positional order.
    fn infer(&mut self, method: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>>;
}

/// Converts between [`Tensor`] and a runtime's own tensor object.
///
/// Each direction makes exactly one copy; the returned value never aliases
/// the buffer it was built from, and a native value owns its memory until it
/// is dropped.
pub trait TensorAdapter {
    type Native;

    fn supports(&self, dtype: DType) -> bool;

    fn to_native(&self, tensor: &Tensor) -> Result<Self::Native>;

    fn from_native(&self, native: &Self::Native) -> Result<Tensor>;

    fn ensure_supported(&self, dtype: DType) -> Result<()> {
        if self.supports(dtype) {
            Ok(())
        } else {
            Err(Error::UnsupportedDType(format!(
                "{dtype} tensors are not supported by this runtime"
            )))
        }
    }
}

/// Object-safe view of a [`Backend`], so engines and handles do not carry
/// the backend type.
pub(crate) trait ErasedBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn initialize(&self, config: &EngineConfig) -> Result<()>;
    fn load_boxed(&self, source: &ModelSource, config: &EngineConfig)
        -> Result<Box<dyn BackendModel>>;
    fn capabilities(&self) -> BackendCapabilities;
}

impl<B: Backend> ErasedBackend for B {
    fn name(&self) -> &'static str {
        Backend::name(self)
    }

    fn initialize(&self, config: &EngineConfig) -> Result<()> {
        Backend::initialize(self, config)
    }

    fn load_boxed(
        &self,
        source: &ModelSource,
        config: &EngineConfig,
    ) -> Result<Box<dyn BackendModel>> {
        let model = Backend::load(self, source, config)?;
        Ok(Box::new(model))
    }

    fn capabilities(&self) -> BackendCapabilities {
        Backend::capabilities(self)
    }
}
