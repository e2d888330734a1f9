#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub String);

#[derive(Clone, Debug, PartialEq)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: Option<super::DType>, // None = kind outside DType
    pub dims: Vec<Option<usize>>,    // None = dynamic
}

/// What a runtime reports about a loaded model. Runtimes that cannot
/// introspect their signature leave `inputs`/`outputs` empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelSpec {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub methods: Vec<String>,
}

impl ModelSpec {
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m == name)
    }
}
