use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

use crate::{Error, Result};

/// Scalar kinds the mobile runtimes accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl DType {
    pub const ALL: [DType; 6] = [
        DType::F32,
        DType::F64,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::Bool,
    ];

    /// Width of one element in the flat buffer.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 | DType::Bool => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DType::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedDType(format!("unknown dtype name `{s}`")))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Element count; the empty product is 1. `None` on overflow.
    pub fn numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d))
    }
}

impl From<&[usize]> for Shape {
    fn from(d: &[usize]) -> Self {
        Self::from_slice(d)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(d: [usize; N]) -> Self {
        Self::from_slice(&d)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(d: Vec<usize>) -> Self {
        Self(SmallVec::from_vec(d))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims())
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for u8 {}
    impl Sealed for bool {}
}

/// Rust scalar types that map onto a [`DType`].
pub trait Element: Copy + PartialEq + fmt::Debug + sealed::Sealed + 'static {
    const DTYPE: DType;

    fn put(self, buf: &mut BytesMut);
    fn get(buf: &mut &[u8]) -> Self;
}

macro_rules! element {
    ($ty:ty, $dtype:expr, $put:ident, $get:ident) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn put(self, buf: &mut BytesMut) {
                buf.$put(self);
            }

            fn get(buf: &mut &[u8]) -> Self {
                buf.$get()
            }
        }
    };
}

element!(f32, DType::F32, put_f32_le, get_f32_le);
element!(f64, DType::F64, put_f64_le, get_f64_le);
element!(i32, DType::I32, put_i32_le, get_i32_le);
element!(i64, DType::I64, put_i64_le, get_i64_le);
element!(u8, DType::U8, put_u8, get_u8);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn put(self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(self));
    }

    fn get(buf: &mut &[u8]) -> Self {
        buf.get_u8() != 0
    }
}

/// Platform-neutral n-dimensional array: dtype, shape and a flat row-major
/// little-endian buffer whose element count always equals the shape product.
///
/// Booleans occupy one byte each, stored as 0 or 1. [`Tensor::new`] accepts
/// any non-zero byte as `true` and stores it as 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tensor {
    dtype: DType,
    shape: Shape,
    data: Bytes,
}

impl Tensor {
    /// Wraps a raw buffer, rejecting it unless it holds exactly
    /// `product(shape)` elements of `dtype`.
    pub fn new(dtype: DType, shape: impl Into<Shape>, data: impl Into<Bytes>) -> Result<Self> {
        let shape = shape.into();
        let mut data = data.into();
        let expected = byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "{dtype} tensor of shape {shape} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        if dtype == DType::Bool && data.iter().any(|b| *b > 1) {
            data = data.iter().map(|b| u8::from(*b != 0)).collect();
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn from_slice<T: Element>(shape: impl Into<Shape>, values: &[T]) -> Result<Self> {
        let shape = shape.into();
        let numel = numel(&shape)?;
        if values.len() != numel {
            return Err(Error::ShapeMismatch(format!(
                "shape {shape} holds {numel} elements, got {}",
                values.len()
            )));
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: encode(values),
        })
    }

    /// Encodes `values` straight into a fresh buffer, without an
    /// intermediate `Vec<T>`.
    pub fn from_iter_exact<T: Element>(
        shape: impl Into<Shape>,
        values: impl ExactSizeIterator<Item = T>,
    ) -> Result<Self> {
        let shape = shape.into();
        let numel = numel(&shape)?;
        if values.len() != numel {
            return Err(Error::ShapeMismatch(format!(
                "shape {shape} holds {numel} elements, got {}",
                values.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(numel * T::DTYPE.size_bytes());
        for v in values {
            v.put(&mut buf);
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: buf.freeze(),
        })
    }

    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: Shape::scalar(),
            data: encode(&[value]),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len() / self.dtype.size_bytes()
    }

    /// Decodes the buffer as `T`; `T` must match the tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::UnsupportedDType(format!(
                "tensor holds {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        let mut buf = &self.data[..];
        Ok((0..self.numel()).map(|_| T::get(&mut buf)).collect())
    }

    pub fn into_parts(self) -> (DType, Shape, Bytes) {
        (self.dtype, self.shape, self.data)
    }
}

fn numel(shape: &Shape) -> Result<usize> {
    shape
        .numel()
        .ok_or_else(|| Error::ShapeMismatch(format!("shape {shape} overflows the address space")))
}

fn byte_len(dtype: DType, shape: &Shape) -> Result<usize> {
    numel(shape)?
        .checked_mul(dtype.size_bytes())
        .ok_or_else(|| Error::ShapeMismatch(format!("shape {shape} overflows the address space")))
}

fn encode<T: Element>(values: &[T]) -> Bytes {
    let mut buf = BytesMut::with_capacity(values.len() * T::DTYPE.size_bytes());
    for v in values {
        v.put(&mut buf);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn typed_round_trip_preserves_everything() -> anyhow::Result<()> {
        let t = Tensor::from_slice([2, 2], &[1.5f32, -0.0, f32::MAX, f32::MIN_POSITIVE])?;
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.shape().dims(), &[2, 2]);
        assert_eq!(t.to_vec::<f32>()?, vec![1.5, -0.0, f32::MAX, f32::MIN_POSITIVE]);

        let t = Tensor::from_slice([3], &[i64::MIN, 0, i64::MAX])?;
        assert_eq!(t.to_vec::<i64>()?, vec![i64::MIN, 0, i64::MAX]);

        let t = Tensor::from_slice([2, 1], &[true, false])?;
        assert_eq!(t.data().as_ref(), &[1, 0]);
        assert_eq!(t.to_vec::<bool>()?, vec![true, false]);
        Ok(())
    }

    #[test]
    fn raw_constructor_keeps_bytes_verbatim() -> anyhow::Result<()> {
        let raw = vec![0u8, 1, 2, 255];
        let t = Tensor::new(DType::U8, [4], raw.clone())?;
        assert_eq!(t.data().as_ref(), raw.as_slice());
        Ok(())
    }

    #[test]
    fn raw_bool_bytes_are_stored_as_zero_or_one() -> anyhow::Result<()> {
        let t = Tensor::new(DType::Bool, [3], vec![0u8, 1, 5])?;
        assert_eq!(t.data().as_ref(), &[0, 1, 1]);
        assert_eq!(t.to_vec::<bool>()?, vec![false, true, true]);

        // Decoding and re-encoding gives back an equal tensor.
        let again = Tensor::from_iter_exact([3], t.to_vec::<bool>()?.into_iter())?;
        assert_eq!(again, t);
        assert_eq!(t, Tensor::from_slice([3], &[false, true, true])?);
        Ok(())
    }

    #[test]
    fn length_mismatch_is_rejected_at_construction() {
        let err = Tensor::from_slice([2, 3], &[1.0f32; 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let err = Tensor::new(DType::I32, [2], vec![0u8; 7]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn scalars_and_empty_tensors() -> anyhow::Result<()> {
        let s = Tensor::scalar(42i32);
        assert_eq!(s.shape().rank(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.to_vec::<i32>()?, vec![42]);

        let empty = Tensor::from_slice::<f64>([4, 0, 2], &[])?;
        assert_eq!(empty.numel(), 0);
        assert!(empty.data().is_empty());

        // An empty shape is a scalar, so it needs exactly one element.
        assert!(Tensor::from_slice::<u8>(Shape::scalar(), &[]).is_err());
        Ok(())
    }

    #[test]
    fn overflowing_shape_is_a_shape_mismatch() {
        let err = Tensor::new(DType::F64, [usize::MAX, 2], Vec::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn to_vec_with_wrong_element_type_fails() -> anyhow::Result<()> {
        let t = Tensor::from_slice([1], &[7u8])?;
        assert_eq!(t.to_vec::<f32>().unwrap_err().kind(), ErrorKind::UnsupportedDType);
        Ok(())
    }

    #[test]
    fn dtype_names_parse_back() -> anyhow::Result<()> {
        for d in DType::ALL {
            assert_eq!(d.as_str().parse::<DType>()?, d);
        }
        assert!("f16".parse::<DType>().is_err());
        Ok(())
    }
}
