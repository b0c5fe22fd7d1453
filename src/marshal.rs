//! Marshalling between engine tensors and the foreign call representation.
//!
//! Inputs are borrowed, never copied. Outputs arrive as transient
//! [`ForeignOutput`] buffers; all of them are validated before the first
//! engine output is allocated, so a rejected call exposes no partial results.

use crate::bridge::{ForeignOutput, InputData, InputView};
use crate::kernel::KernelContext;
use crate::tensor::element_count;
use crate::type_code;
use crate::types::{ElementType, ExtopError, ExtopResult};

/// Build borrowed views of every input in `ctx`.
///
/// Type codes are resolved first, so an unsupported input fails here with
/// no foreign call made. Inputs are then checked against `declared`.
pub fn marshal_inputs<'a>(
    ctx: &'a dyn KernelContext,
    declared: &[ElementType],
) -> ExtopResult<Vec<InputView<'a>>> {
    let count = ctx.input_count();
    let mut views = Vec::with_capacity(count);
    for index in 0..count {
        let value = ctx.input(index).ok_or_else(|| {
            ExtopError::InvalidArgument(format!("input {index} missing from context"))
        })?;
        let type_code = type_code::value_code(value)?;
        let tensor = value
            .as_tensor()
            .ok_or_else(|| ExtopError::Unsupported("input must be a tensor".into()))?;
        let data = match (tensor.as_bytes(), tensor.strings()) {
            (Some(bytes), _) => InputData::Bytes(bytes),
            (None, Some(strings)) => InputData::Strings(strings),
            (None, None) => {
                return Err(ExtopError::InvalidArgument(format!(
                    "input {index} has no storage"
                )))
            }
        };
        views.push((tensor.dtype(), InputView {
            data,
            type_code,
            dims: tensor.dims(),
        }));
    }

    if views.len() != declared.len() {
        return Err(ExtopError::ArityMismatch {
            kind: "input",
            declared: declared.len(),
            actual: views.len(),
        });
    }
    for (index, ((actual, _), &expected)) in views.iter().zip(declared).enumerate() {
        if *actual != expected {
            return Err(ExtopError::TypeMismatch {
                index,
                declared: expected,
                actual: *actual,
            });
        }
    }
    Ok(views.into_iter().map(|(_, view)| view).collect())
}

/// Check that `ctx` has exactly one output slot per declared output.
pub fn check_output_slots(ctx: &dyn KernelContext, declared: &[ElementType]) -> ExtopResult<()> {
    if ctx.output_count() != declared.len() {
        return Err(ExtopError::ArityMismatch {
            kind: "output slot",
            declared: declared.len(),
            actual: ctx.output_count(),
        });
    }
    Ok(())
}

/// Check every foreign output against the declared output types.
pub fn validate_outputs(outputs: &[ForeignOutput], declared: &[ElementType]) -> ExtopResult<()> {
    if outputs.len() != declared.len() {
        return Err(ExtopError::ArityMismatch {
            kind: "output",
            declared: declared.len(),
            actual: outputs.len(),
        });
    }
    for (index, (out, &dtype)) in outputs.iter().zip(declared).enumerate() {
        let width = dtype.size_bytes().ok_or_else(|| {
            ExtopError::Unsupported(format!("output {index} of type {dtype} cannot be copied back"))
        })?;
        if out.elem_size != width {
            return Err(ExtopError::OutputMismatch {
                index,
                reason: format!(
                    "element size {} does not match declared {dtype} ({width} bytes)",
                    out.elem_size
                ),
            });
        }
        let expected = element_count(&out.dims)
            .and_then(|n| n.checked_mul(width))
            .ok_or_else(|| ExtopError::OutputMismatch {
                index,
                reason: format!("invalid shape {:?}", out.dims),
            })?;
        if expected != out.data.len() {
            return Err(ExtopError::OutputMismatch {
                index,
                reason: format!(
                    "shape {:?} needs {expected} bytes, got {}",
                    out.dims,
                    out.data.len()
                ),
            });
        }
    }
    Ok(())
}

/// Allocate engine outputs and copy the foreign buffers into them.
///
/// Expects `outputs` to have passed [`validate_outputs`]. The foreign
/// buffers are dropped as soon as they are copied.
pub fn write_outputs(
    ctx: &mut dyn KernelContext,
    outputs: Vec<ForeignOutput>,
    declared: &[ElementType],
) -> ExtopResult<()> {
    check_output_slots(&*ctx, declared)?;
    for (index, (out, &dtype)) in outputs.into_iter().zip(declared).enumerate() {
        let tensor = ctx.allocate_output(index, &out.dims, dtype)?;
        let dst = tensor.as_bytes_mut().ok_or_else(|| {
            ExtopError::Unsupported(format!("output {index} of type {dtype} is not fixed width"))
        })?;
        if dst.len() != out.data.len() {
            return Err(ExtopError::OutputMismatch {
                index,
                reason: format!(
                    "allocator returned {} bytes, expected {}",
                    dst.len(),
                    out.data.len()
                ),
            });
        }
        dst.copy_from_slice(&out.data);
    }
    Ok(())
}
