//! JSON form of tensors for the command line:
//!
//! ```json
//! [{"dtype": "f32", "shape": [3], "data": [1.0, -2.0, 3.0]}]
//! ```
//!
//! JSON has no non-finite numbers, so float entries may also be the strings
//! `"NaN"`, `"Infinity"` and `"-Infinity"`. Rendering uses the same strings.

use std::path::Path;

use anyhow::{bail, Context, Result};
use liteport_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct TensorJson {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Vec<Value>,
}

impl TensorJson {
    pub fn to_tensor(&self) -> Result<Tensor> {
        let shape = self.shape.clone();
        let tensor = match self.dtype {
            DType::F32 => {
                let floats: Vec<f32> = self.floats()?.into_iter().map(|v| v as f32).collect();
                Tensor::from_slice(shape, &floats)
            }
            DType::F64 => Tensor::from_slice(shape, &self.floats()?),
            DType::I32 => Tensor::from_slice(shape, &self.ints::<i32>()?),
            DType::I64 => Tensor::from_slice(shape, &self.ints::<i64>()?),
            DType::U8 => Tensor::from_slice(shape, &self.ints::<u8>()?),
            DType::Bool => Tensor::from_slice(shape, &self.bools()?),
        }?;
        Ok(tensor)
    }

    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let data = match tensor.dtype() {
            DType::F32 => tensor
                .to_vec::<f32>()?
                .into_iter()
                .map(|v| float_value(f64::from(v)))
                .collect(),
            DType::F64 => tensor.to_vec::<f64>()?.into_iter().map(float_value).collect(),
            DType::I32 => tensor.to_vec::<i32>()?.into_iter().map(Value::from).collect(),
            DType::I64 => tensor.to_vec::<i64>()?.into_iter().map(Value::from).collect(),
            DType::U8 => tensor.to_vec::<u8>()?.into_iter().map(Value::from).collect(),
            DType::Bool => tensor.to_vec::<bool>()?.into_iter().map(Value::from).collect(),
        };
        Ok(Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().dims().to_vec(),
            data,
        })
    }

    fn floats(&self) -> Result<Vec<f64>> {
        self.data
            .iter()
            .map(|v| match v {
                Value::Number(n) => n
                    .as_f64()
                    .with_context(|| format!("{n} is not a valid {} value", self.dtype)),
                Value::String(s) if s == "NaN" => Ok(f64::NAN),
                Value::String(s) if s == "Infinity" => Ok(f64::INFINITY),
                Value::String(s) if s == "-Infinity" => Ok(f64::NEG_INFINITY),
                other => bail!("{} tensor holds non-numeric value {other}", self.dtype),
            })
            .collect()
    }

    fn ints<T: TryFrom<i64>>(&self) -> Result<Vec<T>> {
        self.data
            .iter()
            .map(|v| {
                v.as_i64()
                    .and_then(|i| T::try_from(i).ok())
                    .with_context(|| format!("{v} is not a valid {} value", self.dtype))
            })
            .collect()
    }

    fn bools(&self) -> Result<Vec<bool>> {
        self.data
            .iter()
            .map(|v| match v {
                Value::Bool(b) => Ok(*b),
                Value::Number(n) => Ok(n.as_f64() != Some(0.0)),
                other => bail!("{other} is not a boolean"),
            })
            .collect()
    }
}

fn float_value(v: f64) -> Value {
    if v.is_nan() {
        Value::from("NaN")
    } else if v.is_infinite() {
        Value::from(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        Value::from(v)
    }
}

pub fn read_inputs(path: &Path) -> Result<Vec<Tensor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading inputs from {}", path.display()))?;
    parse_inputs(&raw).with_context(|| format!("parsing inputs in {}", path.display()))
}

pub fn parse_inputs(raw: &str) -> Result<Vec<Tensor>> {
    let entries: Vec<TensorJson> = serde_json::from_str(raw)?;
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| e.to_tensor().with_context(|| format!("input {i}")))
        .collect()
}

pub fn render_outputs(outputs: &[Tensor]) -> Result<String> {
    let entries = outputs
        .iter()
        .map(TensorJson::from_tensor)
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string_pretty(&entries)?)
}
