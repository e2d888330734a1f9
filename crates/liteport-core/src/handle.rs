use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::backend::FORWARD;
use crate::{catch_native, BackendModel, Error, ErrorKind, ModelSpec, Result, Tensor};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Loaded,
    Released,
}

/// Exclusive owner of one loaded native model.
///
/// Calls are serialized: at most one forward pass per handle is in flight,
/// concurrent callers block until it finishes. The native model is freed by
/// [`ModelHandle::release`] or, failing that, when the handle is dropped.
pub struct ModelHandle {
    id: u64,
    backend: &'static str,
    spec: ModelSpec,
    model: Mutex<Option<Box<dyn BackendModel>>>,
}

impl ModelHandle {
    pub(crate) fn new(backend: &'static str, model: Box<dyn BackendModel>) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            spec: model.spec().clone(),
            model: Mutex::new(Some(model)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Signature reported at load time; still readable after release.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn state(&self) -> HandleState {
        if self.slot().is_some() {
            HandleState::Loaded
        } else {
            HandleState::Released
        }
    }

    pub fn is_released(&self) -> bool {
        self.state() == HandleState::Released
    }

    /// Runs the model's `forward` method.
    pub fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.run_method(FORWARD, inputs)
    }

    pub fn run_method(&self, method: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let mut slot = self.slot();
        let Some(model) = slot.as_mut() else {
            debug!(handle = self.id, method, "run on released handle");
            return Err(Error::HandleReleased);
        };

        let t0 = Instant::now();
        let result = catch_native(method, ErrorKind::Inference, || model.infer(method, inputs));
        match &result {
            Ok(outputs) => debug!(
                handle = self.id,
                backend = self.backend,
                method,
                inputs = inputs.len(),
                outputs = outputs.len(),
                elapsed_us = t0.elapsed().as_micros() as u64,
                "forward pass finished"
            ),
            Err(err) => warn!(
                handle = self.id,
                backend = self.backend,
                method,
                kind = err.kind().as_str(),
                error = %err,
                "forward pass failed"
            ),
        }
        result
    }

    /// Frees the native model. Later calls are no-ops.
    pub fn release(&self) {
        let Some(model) = self.slot().take() else {
            return;
        };
        let freed = catch_native("release", ErrorKind::Inference, || {
            drop(model);
            Ok(())
        });
        match freed {
            Ok(()) => info!(handle = self.id, backend = self.backend, "model released"),
            Err(err) => warn!(handle = self.id, error = %err, "native release panicked"),
        }
    }

    // Inference panics are caught inside the lock, so poisoning only follows
    // a bug in this module; the slot itself stays consistent either way.
    fn slot(&self) -> MutexGuard<'_, Option<Box<dyn BackendModel>>> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use crate::InferenceEngine;

    #[test]
    fn run_after_release_never_reaches_native_code() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let stats = backend.stats();
        let engine = InferenceEngine::new(backend);
        let model = engine.load_bytes(MockBackend::model("neg"))?;

        model.run(&[Tensor::scalar(1.0f32)])?;
        assert_eq!(stats.native_calls(), 1);

        model.release();
        assert_eq!(model.state(), HandleState::Released);
        let err = model.run(&[Tensor::scalar(1.0f32)]).unwrap_err();
        assert_eq!(err, Error::HandleReleased);
        let err = model.run_method("forward", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandleReleased);
        assert_eq!(stats.native_calls(), 1);
        Ok(())
    }

    #[test]
    fn release_is_idempotent() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let stats = backend.stats();
        let engine = InferenceEngine::new(backend);
        let model = engine.load_bytes(MockBackend::model("identity"))?;
        assert_eq!(stats.live_models(), 1);

        model.release();
        model.release();
        assert!(model.is_released());
        assert_eq!(stats.live_models(), 0);

        drop(model);
        assert_eq!(stats.live_models(), 0);
        Ok(())
    }

    #[test]
    fn dropping_a_loaded_handle_frees_the_model() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let stats = backend.stats();
        let engine = InferenceEngine::new(backend);
        {
            let _model = engine.load_bytes(MockBackend::model("identity"))?;
            assert_eq!(stats.live_models(), 1);
        }
        assert_eq!(stats.live_models(), 0);
        Ok(())
    }

    #[test]
    fn spec_survives_release() -> anyhow::Result<()> {
        let engine = InferenceEngine::new(MockBackend::new());
        let model = engine.load_bytes(MockBackend::model("neg@2x2"))?;
        model.release();
        assert_eq!(model.spec().inputs[0].dims, vec![Some(2), Some(2)]);
        assert!(model.spec().has_method("forward"));
        assert_eq!(model.backend(), "mock");
        Ok(())
    }
}
