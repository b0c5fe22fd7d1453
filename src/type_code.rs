//! Element type codes shared with the foreign runtime.
//!
//! Codes follow numpy's type numbering so a Python-hosted runtime can build
//! arrays directly. Both sides must agree on this table byte for byte; it is
//! part of the wire contract and is not configurable.
//!
//! F16 and BF16 share code 23. The foreign side receives raw 16-bit words
//! and cannot tell the two apart, so `from_code(23)` resolves to F16.

use crate::tensor::Value;
use crate::types::{ElementType, ExtopError, ExtopResult};

/// Foreign-side element type code.
pub type TypeCode = i32;

pub const CODE_BOOL: TypeCode = 0;
pub const CODE_INT8: TypeCode = 1;
pub const CODE_UINT8: TypeCode = 2;
pub const CODE_INT16: TypeCode = 3;
pub const CODE_UINT16: TypeCode = 4;
pub const CODE_INT32: TypeCode = 5;
pub const CODE_UINT32: TypeCode = 6;
pub const CODE_INT64: TypeCode = 9;
pub const CODE_UINT64: TypeCode = 10;
pub const CODE_FLOAT32: TypeCode = 11;
pub const CODE_FLOAT64: TypeCode = 12;
pub const CODE_STRING: TypeCode = 18;
pub const CODE_FLOAT16: TypeCode = 23;

/// The full forward table.
pub const TYPE_CODE_TABLE: [(ElementType, TypeCode); 14] = [
    (ElementType::Bool, CODE_BOOL),
    (ElementType::I8, CODE_INT8),
    (ElementType::U8, CODE_UINT8),
    (ElementType::I16, CODE_INT16),
    (ElementType::U16, CODE_UINT16),
    (ElementType::I32, CODE_INT32),
    (ElementType::U32, CODE_UINT32),
    (ElementType::I64, CODE_INT64),
    (ElementType::U64, CODE_UINT64),
    (ElementType::F32, CODE_FLOAT32),
    (ElementType::F64, CODE_FLOAT64),
    (ElementType::String, CODE_STRING),
    (ElementType::F16, CODE_FLOAT16),
    (ElementType::BF16, CODE_FLOAT16),
];

/// Map an element type to its foreign code.
pub fn to_code(dtype: ElementType) -> ExtopResult<TypeCode> {
    match dtype {
        ElementType::Bool => Ok(CODE_BOOL),
        ElementType::I8 => Ok(CODE_INT8),
        ElementType::U8 => Ok(CODE_UINT8),
        ElementType::I16 => Ok(CODE_INT16),
        ElementType::U16 => Ok(CODE_UINT16),
        ElementType::I32 => Ok(CODE_INT32),
        ElementType::U32 => Ok(CODE_UINT32),
        ElementType::I64 => Ok(CODE_INT64),
        ElementType::U64 => Ok(CODE_UINT64),
        ElementType::F32 => Ok(CODE_FLOAT32),
        ElementType::F64 => Ok(CODE_FLOAT64),
        ElementType::String => Ok(CODE_STRING),
        ElementType::F16 | ElementType::BF16 => Ok(CODE_FLOAT16),
        ElementType::Complex64 | ElementType::Complex128 => Err(ExtopError::Unsupported(
            format!("input type {dtype} has no foreign type code"),
        )),
    }
}

/// Map a graph value to its foreign code. Non-tensor values are rejected.
pub fn value_code(value: &Value) -> ExtopResult<TypeCode> {
    match value {
        Value::Tensor(t) => to_code(t.dtype()),
        Value::Sequence(_) => Err(ExtopError::Unsupported(
            "input must be a tensor, got a sequence".into(),
        )),
    }
}

/// Reverse lookup. Code 23 resolves to F16.
pub fn from_code(code: TypeCode) -> Option<ElementType> {
    match code {
        CODE_BOOL => Some(ElementType::Bool),
        CODE_INT8 => Some(ElementType::I8),
        CODE_UINT8 => Some(ElementType::U8),
        CODE_INT16 => Some(ElementType::I16),
        CODE_UINT16 => Some(ElementType::U16),
        CODE_INT32 => Some(ElementType::I32),
        CODE_UINT32 => Some(ElementType::U32),
        CODE_INT64 => Some(ElementType::I64),
        CODE_UINT64 => Some(ElementType::U64),
        CODE_FLOAT32 => Some(ElementType::F32),
        CODE_FLOAT64 => Some(ElementType::F64),
        CODE_STRING => Some(ElementType::String),
        CODE_FLOAT16 => Some(ElementType::F16),
        _ => None,
    }
}
