//! Registration-time description of an external operator.

use std::fmt;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::instance::{ExternalKernel, LogFn, Signature};
use crate::kernel::OpSchema;
use crate::types::{Attributes, ElementType, ExtopResult};

/// Operator name reported to the engine.
pub const EXTERNAL_OP_NAME: &str = "ExtOp";
/// Foreign method run when no compute name is given.
pub const DEFAULT_COMPUTE: &str = "compute";
/// Log target for lines emitted by foreign code.
pub const FOREIGN_LOG_TARGET: &str = "gllm_extop::foreign";

fn default_logger() -> LogFn {
    Arc::new(|msg: &str| log::info!(target: FOREIGN_LOG_TARGET, "{msg}"))
}

/// Declared signature and construction parameters of one external operator.
///
/// The descriptor does not check that the foreign class honours the
/// declared types; a mismatch surfaces when the kernel runs.
#[derive(Clone)]
pub struct ExternalOpDescriptor {
    attrs: Attributes,
    signature: Signature,
    module: String,
    class_name: String,
    compute: String,
    logger: LogFn,
}

impl ExternalOpDescriptor {
    pub fn new(
        module: impl Into<String>,
        class_name: impl Into<String>,
        input_types: Vec<ElementType>,
        output_types: Vec<ElementType>,
    ) -> Self {
        ExternalOpDescriptor {
            attrs: Attributes::new(),
            signature: Signature {
                inputs: input_types,
                outputs: output_types,
            },
            module: module.into(),
            class_name: class_name.into(),
            compute: DEFAULT_COMPUTE.to_string(),
            logger: default_logger(),
        }
    }

    pub fn with_compute(mut self, compute: impl Into<String>) -> Self {
        self.compute = compute.into();
        self
    }

    /// Attributes passed to every kernel; node attributes override them.
    pub fn with_attributes(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_logger(mut self, logger: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn compute(&self) -> &str {
        &self.compute
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Build the kernel for one graph node.
    pub fn create_kernel(&self, bridge: &Bridge, attrs: &Attributes) -> ExtopResult<ExternalKernel> {
        let mut merged = self.attrs.clone();
        merged.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        ExternalKernel::create(
            bridge,
            &self.module,
            &self.class_name,
            &self.compute,
            merged,
            self.signature.clone(),
            self.logger.clone(),
        )
    }

    /// Build the kernel against the process-wide bridge.
    pub fn create_kernel_global(&self, attrs: &Attributes) -> ExtopResult<ExternalKernel> {
        let bridge = Bridge::acquire()?;
        self.create_kernel(&bridge, attrs)
    }
}

impl OpSchema for ExternalOpDescriptor {
    fn name(&self) -> &str {
        EXTERNAL_OP_NAME
    }

    fn input_type_count(&self) -> usize {
        self.signature.inputs.len()
    }

    fn input_type(&self, index: usize) -> Option<ElementType> {
        self.signature.inputs.get(index).copied()
    }

    fn output_type_count(&self) -> usize {
        self.signature.outputs.len()
    }

    fn output_type(&self, index: usize) -> Option<ElementType> {
        self.signature.outputs.get(index).copied()
    }
}

impl fmt::Debug for ExternalOpDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalOpDescriptor")
            .field("module", &self.module)
            .field("class_name", &self.class_name)
            .field("compute", &self.compute)
            .field("signature", &self.signature)
            .field("attrs", &self.attrs)
            .finish()
    }
}
