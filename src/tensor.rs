//! Engine-side tensors handed to and produced by the bridge.

use std::ffi::CString;

use half::{bf16, f16};

use crate::types::{ElementType, ExtopError, ExtopResult};

/// Scalar types that can back a fixed-width tensor.
pub trait TensorElement: Copy + 'static {
    const DTYPE: ElementType;

    fn write_ne(self, out: &mut Vec<u8>);
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_tensor_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {$(
        impl TensorElement for $t {
            const DTYPE: ElementType = ElementType::$dtype;

            #[inline]
            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }
        }
    )*};
}

impl_tensor_element!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
    f32 => F32, f64 => F64, f16 => F16, bf16 => BF16,
);

impl TensorElement for bool {
    const DTYPE: ElementType = ElementType::Bool;

    #[inline]
    fn write_ne(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    #[inline]
    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Number of elements described by `dims`.
///
/// Returns `None` for negative dimensions or when the product overflows.
/// An empty shape is a scalar with one element.
pub fn element_count(dims: &[i64]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        let d = usize::try_from(d).ok()?;
        acc.checked_mul(d)
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Bytes(Vec<u8>),
    Strings(Vec<CString>),
}

/// A dense, contiguous, host-resident tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: ElementType,
    dims: Vec<i64>,
    storage: Storage,
}

impl Tensor {
    /// Copy a typed slice into a new tensor of shape `dims`.
    ///
    /// # Panics
    /// Panics if `dims` does not describe exactly `data.len()` elements.
    pub fn from_slice<T: TensorElement>(data: &[T], dims: Vec<i64>) -> Self {
        assert_eq!(
            element_count(&dims),
            Some(data.len()),
            "shape {dims:?} does not match {} elements",
            data.len()
        );
        let mut bytes = Vec::with_capacity(data.len() * std::mem::size_of::<T>());
        for &v in data {
            v.write_ne(&mut bytes);
        }
        Tensor {
            dtype: T::DTYPE,
            dims,
            storage: Storage::Bytes(bytes),
        }
    }

    /// Build a string tensor. Strings must not contain NUL bytes.
    pub fn from_strings<S: AsRef<str>>(data: &[S], dims: Vec<i64>) -> ExtopResult<Self> {
        if element_count(&dims) != Some(data.len()) {
            return Err(ExtopError::InvalidArgument(format!(
                "shape {dims:?} does not match {} strings",
                data.len()
            )));
        }
        let strings = data
            .iter()
            .map(|s| {
                CString::new(s.as_ref()).map_err(|_| {
                    ExtopError::InvalidArgument("string tensor element contains NUL".into())
                })
            })
            .collect::<ExtopResult<Vec<_>>>()?;
        Ok(Tensor {
            dtype: ElementType::String,
            dims,
            storage: Storage::Strings(strings),
        })
    }

    /// Allocate a zero-filled tensor (empty strings for string tensors).
    pub fn zeroed(dtype: ElementType, dims: &[i64]) -> ExtopResult<Self> {
        let count = element_count(dims).ok_or_else(|| {
            ExtopError::InvalidArgument(format!("invalid shape {dims:?}"))
        })?;
        let storage = match dtype.size_bytes() {
            Some(width) => {
                let len = count.checked_mul(width).ok_or_else(|| {
                    ExtopError::InvalidArgument(format!("shape {dims:?} overflows"))
                })?;
                Storage::Bytes(vec![0u8; len])
            }
            None => Storage::Strings(vec![CString::default(); count]),
        };
        Ok(Tensor {
            dtype,
            dims: dims.to_vec(),
            storage,
        })
    }

    #[inline]
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    #[inline]
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn num_elements(&self) -> usize {
        match &self.storage {
            Storage::Bytes(b) => match self.dtype.size_bytes() {
                Some(w) if w > 0 => b.len() / w,
                _ => 0,
            },
            Storage::Strings(s) => s.len(),
        }
    }

    /// Byte length of fixed-width storage; zero for string tensors.
    pub fn len_bytes(&self) -> usize {
        match &self.storage {
            Storage::Bytes(b) => b.len(),
            Storage::Strings(_) => 0,
        }
    }

    /// Raw element storage of a fixed-width tensor.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Bytes(b) => Some(b),
            Storage::Strings(_) => None,
        }
    }

    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Storage::Bytes(b) => Some(b),
            Storage::Strings(_) => None,
        }
    }

    pub fn strings(&self) -> Option<&[CString]> {
        match &self.storage {
            Storage::Strings(s) => Some(s),
            Storage::Bytes(_) => None,
        }
    }

    /// Read the elements back as `T`. `None` when `T` is not the tensor's type.
    pub fn to_vec<T: TensorElement>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        let bytes = self.as_bytes()?;
        let width = std::mem::size_of::<T>();
        Some(bytes.chunks_exact(width).map(T::read_ne).collect())
    }
}

/// A graph value passed to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    Sequence(Vec<Tensor>),
}

impl Value {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            Value::Sequence(_) => None,
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}
