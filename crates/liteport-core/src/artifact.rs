use std::path::PathBuf;

use bytes::Bytes;

/// Where a serialized lite-model comes from.
#[derive(Clone, Debug)]
pub enum ModelSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl ModelSource {
    /// Short label for logs; never includes the model contents.
    pub fn describe(&self) -> String {
        match self {
            ModelSource::Path(p) => p.display().to_string(),
            ModelSource::Bytes(b) => format!("<{} bytes in memory>", b.len()),
        }
    }
}

impl From<PathBuf> for ModelSource {
    fn from(p: PathBuf) -> Self {
        ModelSource::Path(p)
    }
}

impl From<&std::path::Path> for ModelSource {
    fn from(p: &std::path::Path) -> Self {
        ModelSource::Path(p.to_path_buf())
    }
}

impl From<Vec<u8>> for ModelSource {
    fn from(b: Vec<u8>) -> Self {
        ModelSource::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for ModelSource {
    fn from(b: Bytes) -> Self {
        ModelSource::Bytes(b)
    }
}
