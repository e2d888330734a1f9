//! The closed set of failures every liteport operation reports.
//!
//! Bindings translate their native failure modes into one of these kinds at
//! the boundary; nothing else crosses into caller code.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Discriminant of [`Error`], stable across the Rust and mobile surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ModelLoad,
    HandleReleased,
    UnsupportedDType,
    ShapeMismatch,
    Inference,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ModelLoad => "model_load",
            ErrorKind::HandleReleased => "handle_released",
            ErrorKind::UnsupportedDType => "unsupported_dtype",
            ErrorKind::ShapeMismatch => "shape_mismatch",
            ErrorKind::Inference => "inference",
        }
    }
}

/// Errors returned by tensor construction, model loading and inference.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The model file is missing, unreadable or rejected by the runtime, or
    /// the runtime itself could not be initialized.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The handle was released before the call.
    #[error("model handle has been released")]
    HandleReleased,

    /// The dtype is not among the runtime's (or the caller's) scalar kinds.
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),

    /// Tensor data does not match its shape, or inputs do not match the model.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The native forward pass failed.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ModelLoad(_) => ErrorKind::ModelLoad,
            Error::HandleReleased => ErrorKind::HandleReleased,
            Error::UnsupportedDType(_) => ErrorKind::UnsupportedDType,
            Error::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            Error::Inference(_) => ErrorKind::Inference,
        }
    }

    /// Builds an error of `kind` carrying `message`.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::ModelLoad => Error::ModelLoad(message),
            ErrorKind::HandleReleased => Error::HandleReleased,
            ErrorKind::UnsupportedDType => Error::UnsupportedDType(message),
            ErrorKind::ShapeMismatch => Error::ShapeMismatch(message),
            ErrorKind::Inference => Error::Inference(message),
        }
    }

    /// Diagnostic text without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Error::ModelLoad(m)
            | Error::UnsupportedDType(m)
            | Error::ShapeMismatch(m)
            | Error::Inference(m) => m.clone(),
            Error::HandleReleased => "model handle has been released".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs a native invocation, turning a panic raised inside the binding into
/// an error of `kind` instead of unwinding into the caller.
pub fn catch_native<T>(op: &str, kind: ErrorKind, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            tracing::warn!(op, detail = %detail, "native call panicked");
            Err(Error::from_kind(kind, format!("{op} panicked: {detail}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_from_kind() {
        for kind in [
            ErrorKind::ModelLoad,
            ErrorKind::HandleReleased,
            ErrorKind::UnsupportedDType,
            ErrorKind::ShapeMismatch,
            ErrorKind::Inference,
        ] {
            assert_eq!(Error::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn catch_native_converts_panics() {
        let result: Result<()> = catch_native("forward", ErrorKind::Inference, || {
            panic!("kernel exploded")
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inference);
        assert!(err.message().contains("kernel exploded"));
    }

    #[test]
    fn catch_native_passes_results_through() {
        let ok = catch_native("load", ErrorKind::ModelLoad, || Ok(7));
        assert_eq!(ok, Ok(7));

        let err: Result<()> = catch_native("load", ErrorKind::ModelLoad, || {
            Err(Error::ShapeMismatch("bad".into()))
        });
        assert_eq!(err.unwrap_err().kind(), ErrorKind::ShapeMismatch);
    }
}
