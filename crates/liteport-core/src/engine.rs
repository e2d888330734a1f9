//! Public entry point: lazy runtime initialization and model loading.
//!
//! ```text
//! InferenceEngine::new(backend)
//!     │  .load(source)        first call initializes the runtime
//!     ▼
//! ModelHandle (Loaded)
//!     │  .run(&inputs)        repeatable
//!     │  .release()           idempotent
//!     ▼
//! ModelHandle (Released)
//! ```

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::backend::ErasedBackend;
use crate::{
    catch_native, Backend, BackendCapabilities, EngineConfig, Error, ErrorKind, ModelHandle,
    ModelSource, Result,
};

pub struct InferenceEngine {
    backend: Box<dyn ErasedBackend>,
    config: EngineConfig,
    initialized: Mutex<bool>,
}

impl InferenceEngine {
    pub fn new<B: Backend>(backend: B) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config<B: Backend>(backend: B, config: EngineConfig) -> Self {
        Self {
            backend: Box::new(backend),
            config,
            initialized: Mutex::new(false),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads a serialized lite-model. Every failure, including runtime
    /// initialization, is reported as [`Error::ModelLoad`].
    pub fn load(&self, source: impl Into<ModelSource>) -> Result<ModelHandle> {
        let source = source.into();
        self.ensure_initialized()?;

        let backend = self.backend.name();
        let t0 = Instant::now();
        let model = catch_native("load", ErrorKind::ModelLoad, || {
            self.backend.load_boxed(&source, &self.config)
        })
        .map_err(|err| {
            let err = as_load_error(err);
            warn!(backend, source = %source.describe(), error = %err, "model load failed");
            err
        })?;

        let handle = ModelHandle::new(backend, model);
        info!(
            backend,
            handle = handle.id(),
            source = %source.describe(),
            inputs = handle.spec().inputs.len(),
            outputs = handle.spec().outputs.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(handle)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ModelHandle> {
        self.load(ModelSource::Path(path.as_ref().to_path_buf()))
    }

    pub fn load_bytes(&self, bytes: impl Into<Bytes>) -> Result<ModelHandle> {
        self.load(ModelSource::Bytes(bytes.into()))
    }

    fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().unwrap_or_else(PoisonError::into_inner);
        if *initialized {
            return Ok(());
        }

        let backend = self.backend.name();
        debug!(backend, "initializing runtime");
        catch_native("initialize", ErrorKind::ModelLoad, || {
            self.backend.initialize(&self.config)
        })
        .map_err(|err| {
            let err = as_load_error(err);
            warn!(backend, error = %err, "runtime initialization failed");
            err
        })?;

        *initialized = true;
        info!(backend, threads = self.config.resolve_threads(), "runtime initialized");
        Ok(())
    }
}

fn as_load_error(err: Error) -> Error {
    match err {
        Error::ModelLoad(_) => err,
        other => Error::ModelLoad(other.to_string()),
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
