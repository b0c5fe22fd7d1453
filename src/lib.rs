//! gllm-extop: run graph operators implemented in a foreign runtime.
//!
//! The engine calls an external operator like any other kernel. Behind it:
//! - **Bridge**: loads the foreign runtime library once per process and
//!   resolves its five entry points (`Initialize`, `NewInstance`,
//!   `InvokeCompute`, `ReleaseInstance`, `GetLastErrorMessage`)
//! - **Operator instances**: one foreign object per graph node, released
//!   exactly once when the node goes away
//! - **Marshalling**: inputs are lent to the foreign call without copying;
//!   outputs are validated, then copied into engine-owned tensors
//! - **Type codes**: a fixed table shared with the foreign side
//!
//! # Quick Start
//!
//! ```ignore
//! use gllm_extop::{Attributes, ElementType, ExternalOpDescriptor, Kernel, OpContext, Tensor};
//!
//! let desc = ExternalOpDescriptor::new(
//!     "extop.builtin", "Doubler",
//!     vec![ElementType::F32], vec![ElementType::F32],
//! );
//! let kernel = desc.create_kernel_global(&Attributes::new())?;
//! let mut ctx = OpContext::new(vec![Tensor::from_slice(&[1.0f32, 2.0], vec![2]).into()], 1);
//! kernel.compute(&mut ctx)?;
//! ```

pub mod bridge;
pub mod descriptor;
pub mod instance;
pub mod kernel;
pub mod marshal;
pub mod tensor;
pub mod type_code;
pub mod types;

pub use bridge::{
    Bridge, BridgeConfig, BridgeLib, EntryPoints, ForeignOutput, ForeignRuntime, InputData,
    InputView, InstanceId,
};
pub use descriptor::{ExternalOpDescriptor, DEFAULT_COMPUTE, EXTERNAL_OP_NAME};
pub use instance::{ExternalKernel, InstanceHandle, LogFn, Signature};
pub use kernel::{Kernel, KernelContext, OpContext, OpSchema};
pub use tensor::{element_count, Tensor, TensorElement, Value};
pub use type_code::{from_code, to_code, TypeCode, TYPE_CODE_TABLE};
pub use types::{Attributes, ElementType, ExtopError, ExtopResult};
