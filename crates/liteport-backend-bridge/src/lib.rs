//! Binding to the C++ lite interpreter through a small C shim.
//!
//! The shim exports one function table ([`ffi::BridgeApi`]). It catches
//! every C++ exception at the boundary and reports it as a status code plus
//! message, and hands out raw objects the caller must release. The wrappers
//! in this crate own those objects and free them on every path.

pub mod ffi;
mod native;

#[cfg(test)]
mod fake;

use std::ffi::CString;

use liteport_core::{
    Backend, BackendCapabilities, BackendModel, DType, EngineConfig, Error, ErrorKind,
    ModelSource, ModelSpec, Result, Tensor, TensorAdapter, FORWARD,
};
use tracing::debug;

use crate::ffi::{BridgeApi, LpError, BRIDGE_ABI_VERSION};
use crate::native::{translate, NativeModule};

pub use crate::native::NativeTensor;

#[derive(Clone)]
pub struct BridgeBackend {
    api: &'static BridgeApi,
    methods: Vec<String>,
}

impl BridgeBackend {
    /// Uses a function table supplied by the host, e.g. one resolved from a
    /// dynamically loaded shim.
    pub fn from_api(api: &'static BridgeApi) -> Self {
        Self {
            api,
            methods: vec![FORWARD.to_string()],
        }
    }

    /// Extra method names to look up on every loaded module. The interpreter
    /// cannot enumerate methods, so [`ModelSpec::methods`] lists only
    /// `forward` and the names given here that the module defines.
    pub fn with_methods<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.methods.contains(&name) {
                self.methods.push(name);
            }
        }
        self
    }

    /// Uses the shim statically linked through the `link-native` feature.
    #[cfg(feature = "link-native")]
    pub fn linked() -> Result<Self> {
        // SAFETY: the shim returns null or a pointer to a static table.
        let api = unsafe { ffi::liteport_bridge_api().as_ref() };
        api.map(Self::from_api).ok_or_else(|| {
            Error::ModelLoad("native bridge did not provide a function table".to_string())
        })
    }
}

impl std::fmt::Debug for BridgeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBackend")
            .field("abi_version", &self.api.abi_version)
            .field("methods", &self.methods)
            .finish()
    }
}

impl Backend for BridgeBackend {
    type Model = BridgeModel;

    fn name(&self) -> &'static str {
        "lite-interpreter"
    }

    fn initialize(&self, config: &EngineConfig) -> Result<()> {
        if self.api.abi_version != BRIDGE_ABI_VERSION {
            return Err(Error::ModelLoad(format!(
                "native bridge speaks ABI v{}, expected v{BRIDGE_ABI_VERSION}",
                self.api.abi_version
            )));
        }
        let threads = u32::try_from(config.resolve_threads()).unwrap_or(u32::MAX);
        let mut err = LpError::new();
        let status = unsafe { (self.api.runtime_init)(threads, &mut err) };
        if status != ffi::LP_OK {
            err.status = status;
            return Err(translate(&err, ErrorKind::ModelLoad));
        }
        debug!(threads, "lite interpreter initialized");
        Ok(())
    }

    fn load(&self, source: &ModelSource, _config: &EngineConfig) -> Result<Self::Model> {
        let mut err = LpError::new();
        let raw = match source {
            ModelSource::Path(path) => {
                let path = path
                    .to_str()
                    .and_then(|p| CString::new(p).ok())
                    .ok_or_else(|| {
                        Error::ModelLoad(format!("{} is not a valid native path", path.display()))
                    })?;
                unsafe { (self.api.module_load_file)(path.as_ptr(), &mut err) }
            }
            ModelSource::Bytes(bytes) => unsafe {
                (self.api.module_load_buffer)(bytes.as_ptr(), bytes.len(), &mut err)
            },
        };
        let module = NativeModule::from_raw(self.api, raw, &err).map_err(|e| {
            Error::ModelLoad(format!("{}: {}", source.describe(), e.message()))
        })?;

        // The interpreter does not expose argument signatures, only methods.
        let spec = ModelSpec {
            inputs: Vec::new(),
            outputs: Vec::new(),
            methods: self
                .methods
                .iter()
                .filter(|m| CString::new(m.as_str()).is_ok_and(|c| module.has_method(&c)))
                .cloned()
                .collect(),
        };
        debug!(methods = ?spec.methods, "lite module loaded");

        Ok(BridgeModel {
            spec,
            module,
            adapter: BridgeTensorAdapter { api: self.api },
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            named_methods: true,
            introspects_signature: false,
        }
    }
}

pub struct BridgeModel {
    spec: ModelSpec,
    module: NativeModule,
    adapter: BridgeTensorAdapter,
}

impl BackendModel for BridgeModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, method: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let method_name = CString::new(method)
            .map_err(|_| Error::Inference(format!("method name {method:?} contains NUL")))?;

        let natives = inputs
            .iter()
            .map(|t| self.adapter.to_native(t))
            .collect::<Result<Vec<_>>>()?;

        let outputs = self.module.run_method(&method_name, &natives)?;
        // Inputs are no longer needed once the pass has produced its outputs.
        drop(natives);

        let tensors = (0..outputs.len())
            .map(|i| outputs.get(i)?.to_tensor())
            .collect::<Result<Vec<_>>>()?;
        Ok(tensors)
    }
}

/// Converts between liteport tensors and interpreter tensors.
#[derive(Clone, Copy)]
pub struct BridgeTensorAdapter {
    api: &'static BridgeApi,
}

impl BridgeTensorAdapter {
    pub fn new(api: &'static BridgeApi) -> Self {
        Self { api }
    }
}

impl TensorAdapter for BridgeTensorAdapter {
    type Native = NativeTensor;

    fn supports(&self, _dtype: DType) -> bool {
        true
    }

    fn to_native(&self, tensor: &Tensor) -> Result<NativeTensor> {
        self.ensure_supported(tensor.dtype())?;
        NativeTensor::create(self.api, tensor)
    }

    fn from_native(&self, native: &NativeTensor) -> Result<Tensor> {
        native.view().to_tensor()
    }
}
