//! Operator instances: one foreign object per graph node.

use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

use crate::bridge::{Bridge, InstanceId};
use crate::kernel::{Kernel, KernelContext};
use crate::marshal;
use crate::types::{Attributes, ElementType, ExtopError, ExtopResult};

/// Receives log lines emitted by foreign code during a compute call.
pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Declared element types of a node's inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub inputs: Vec<ElementType>,
    pub outputs: Vec<ElementType>,
}

/// Exclusive owner of one foreign instance.
///
/// The foreign release entry point runs at most once: on the first
/// [`release`](Self::release) or on drop, whichever comes first.
pub struct InstanceHandle {
    id: Option<InstanceId>,
    bridge: Bridge,
}

impl InstanceHandle {
    fn new(id: InstanceId, bridge: Bridge) -> Self {
        InstanceHandle {
            id: Some(id),
            bridge,
        }
    }

    pub fn is_live(&self) -> bool {
        self.id.is_some()
    }

    pub fn id(&self) -> Option<&InstanceId> {
        self.id.as_ref()
    }

    /// Release the foreign instance. No-op once released.
    pub fn release(&mut self) {
        if let Some(id) = self.id.take() {
            log::debug!("Releasing foreign instance {id:?}");
            self.bridge.release_instance(id);
        }
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle").field("id", &self.id).finish()
    }
}

fn c_string(what: &str, s: &str) -> ExtopResult<CString> {
    CString::new(s).map_err(|_| ExtopError::InvalidArgument(format!("{what} contains NUL: {s:?}")))
}

/// A graph node's kernel whose computation runs in the foreign runtime.
pub struct ExternalKernel {
    handle: InstanceHandle,
    module: String,
    class_name: String,
    compute: CString,
    attrs: Attributes,
    signature: Signature,
    logger: LogFn,
}

impl ExternalKernel {
    /// Construct the foreign instance `module.class_name` with `attrs`.
    ///
    /// `compute` names the foreign method run by [`Kernel::compute`].
    pub fn create(
        bridge: &Bridge,
        module: &str,
        class_name: &str,
        compute: &str,
        attrs: Attributes,
        signature: Signature,
        logger: LogFn,
    ) -> ExtopResult<Self> {
        let c_module = c_string("module name", module)?;
        let c_class = c_string("class name", class_name)?;
        let c_compute = c_string("compute name", compute)?;

        let mut sorted: Vec<(&String, &String)> = attrs.iter().collect();
        sorted.sort();
        let c_attrs = sorted
            .into_iter()
            .map(|(k, v)| Ok((c_string("attribute name", k)?, c_string("attribute value", v)?)))
            .collect::<ExtopResult<Vec<_>>>()?;

        let id = bridge.new_instance(&c_module, &c_class, &c_attrs)?;
        log::debug!(
            "Constructed {module}.{class_name} as {id:?} ({} attributes)",
            c_attrs.len()
        );
        Ok(ExternalKernel {
            handle: InstanceHandle::new(id, bridge.clone()),
            module: module.to_string(),
            class_name: class_name.to_string(),
            compute: c_compute,
            attrs,
            signature,
            logger,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn compute_name(&self) -> &str {
        self.compute.to_str().unwrap_or_default()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.handle.id()
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Release the foreign instance early. Later computes fail with
    /// [`ExtopError::Released`].
    pub fn release(&mut self) {
        self.handle.release();
    }
}

impl Kernel for ExternalKernel {
    fn compute(&self, ctx: &mut dyn KernelContext) -> ExtopResult<()> {
        let id = self.handle.id().ok_or(ExtopError::Released)?;
        let inputs = marshal::marshal_inputs(&*ctx, &self.signature.inputs)?;
        marshal::check_output_slots(&*ctx, &self.signature.outputs)?;
        log::trace!(
            "Invoking {}.{}::{} on {id:?} with {} inputs",
            self.module,
            self.class_name,
            self.compute_name(),
            inputs.len()
        );

        let outputs = self
            .handle
            .bridge
            .invoke(id, &self.compute, &inputs, &*self.logger)
            .inspect_err(|e| log::error!("{}.{}: {e}", self.module, self.class_name))?;
        drop(inputs);

        marshal::validate_outputs(&outputs, &self.signature.outputs)?;
        marshal::write_outputs(ctx, outputs, &self.signature.outputs)
    }
}

impl fmt::Debug for ExternalKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalKernel")
            .field("module", &self.module)
            .field("class_name", &self.class_name)
            .field("compute", &self.compute)
            .field("handle", &self.handle)
            .finish()
    }
}
