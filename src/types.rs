//! Core types shared by the bridge: element types, attributes and errors.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Node attributes handed to the foreign constructor, string to string.
pub type Attributes = HashMap<String, String>;

/// Element type of an engine tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ElementType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    BF16,
    F32,
    F64,
    String,
    Complex64,
    Complex128,
}

impl ElementType {
    /// Every element type the engine knows about.
    pub const ALL: [ElementType; 16] = [
        Self::Bool,
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F16,
        Self::BF16,
        Self::F32,
        Self::F64,
        Self::String,
        Self::Complex64,
        Self::Complex128,
    ];

    /// Size in bytes per element, `None` for variable-width strings.
    pub const fn size_bytes(self) -> Option<usize> {
        match self {
            Self::Bool | Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 | Self::F16 | Self::BF16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 | Self::Complex64 => Some(8),
            Self::Complex128 => Some(16),
            Self::String => None,
        }
    }

    pub const fn is_fixed_width(self) -> bool {
        self.size_bytes().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "int8",
            Self::U8 => "uint8",
            Self::I16 => "int16",
            Self::U16 => "uint16",
            Self::I32 => "int32",
            Self::U32 => "uint32",
            Self::I64 => "int64",
            Self::U64 => "uint64",
            Self::F16 => "float16",
            Self::BF16 => "bfloat16",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::String => "string",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by the external-operator bridge.
///
/// Variants fall into four groups: environment (library, symbols, foreign
/// initialization), construction, invocation, and type mapping.
#[derive(Debug, Clone, Error)]
pub enum ExtopError {
    #[error("failed to load bridge library (tried: {tried})")]
    LibraryNotFound { tried: String },
    #[error("failed to import function {symbol}: {reason}")]
    MissingSymbol { symbol: &'static str, reason: String },
    #[error("foreign runtime initialization failed: {0}")]
    InitializeFailed(String),
    #[error("failed to construct {module}.{class_name}: {message}")]
    ConstructFailed {
        module: String,
        class_name: String,
        message: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("foreign compute '{compute}' failed: {message}")]
    InvokeFailed { compute: String, message: String },
    #[error("{kind} count mismatch: declared {declared}, got {actual}")]
    ArityMismatch {
        kind: &'static str,
        declared: usize,
        actual: usize,
    },
    #[error("input {index} type mismatch: declared {declared}, got {actual}")]
    TypeMismatch {
        index: usize,
        declared: ElementType,
        actual: ElementType,
    },
    #[error("output {index} rejected: {reason}")]
    OutputMismatch { index: usize, reason: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("operator instance already released")]
    Released,
}

impl ExtopError {
    /// Whether the error comes from loading or initializing the foreign runtime.
    ///
    /// Environment errors are permanent for the life of the process.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::LibraryNotFound { .. } | Self::MissingSymbol { .. } | Self::InitializeFailed(_)
        )
    }
}

pub type ExtopResult<T> = Result<T, ExtopError>;
