//! Kernel contract between the graph engine and operator implementations.
//!
//! The engine sees every operator, native or external, through [`Kernel`]
//! and [`OpSchema`]. Inputs are read and outputs allocated through a
//! [`KernelContext`] supplied per call.

use crate::tensor::{Tensor, Value};
use crate::types::{ElementType, ExtopError, ExtopResult};

/// Per-call access to a node's inputs and output allocator.
pub trait KernelContext {
    fn input_count(&self) -> usize;

    fn input(&self, index: usize) -> Option<&Value>;

    fn output_count(&self) -> usize;

    /// Allocate output `index` with the given shape and element type and
    /// return writable storage for it.
    fn allocate_output(
        &mut self,
        index: usize,
        dims: &[i64],
        dtype: ElementType,
    ) -> ExtopResult<&mut Tensor>;
}

/// A computation bound to one graph node.
pub trait Kernel: Send {
    fn compute(&self, ctx: &mut dyn KernelContext) -> ExtopResult<()>;
}

/// Static metadata of an operator: name and declared signature.
pub trait OpSchema {
    fn name(&self) -> &str;

    fn input_type_count(&self) -> usize;

    fn input_type(&self, index: usize) -> Option<ElementType>;

    fn output_type_count(&self) -> usize;

    fn output_type(&self, index: usize) -> Option<ElementType>;
}

/// Owned inputs and lazily allocated outputs for one node execution.
#[derive(Debug, Default)]
pub struct OpContext {
    inputs: Vec<Value>,
    outputs: Vec<Option<Tensor>>,
}

impl OpContext {
    pub fn new(inputs: Vec<Value>, output_count: usize) -> Self {
        OpContext {
            inputs,
            outputs: vec![None; output_count],
        }
    }

    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }

    pub fn output(&self, index: usize) -> Option<&Tensor> {
        self.outputs.get(index).and_then(Option::as_ref)
    }

    /// Number of outputs allocated so far.
    pub fn allocated_outputs(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    pub fn take_outputs(&mut self) -> Vec<Option<Tensor>> {
        let n = self.outputs.len();
        std::mem::replace(&mut self.outputs, vec![None; n])
    }
}

impl KernelContext for OpContext {
    fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn input(&self, index: usize) -> Option<&Value> {
        self.inputs.get(index)
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn allocate_output(
        &mut self,
        index: usize,
        dims: &[i64],
        dtype: ElementType,
    ) -> ExtopResult<&mut Tensor> {
        let count = self.outputs.len();
        let slot = self.outputs.get_mut(index).ok_or_else(|| {
            ExtopError::InvalidArgument(format!("output index {index} out of range ({count})"))
        })?;
        Ok(slot.insert(Tensor::zeroed(dtype, dims)?))
    }
}
