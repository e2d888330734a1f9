pub mod artifact;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod layout;
pub mod spec;
pub mod tensor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use artifact::*;
pub use backend::{Backend, BackendCapabilities, BackendModel, TensorAdapter, FORWARD};
pub use config::*;
pub use engine::*;
pub use error::*;
pub use handle::*;
pub use spec::*;
pub use tensor::*;
