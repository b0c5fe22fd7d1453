//! Bridge to a foreign operator runtime.
//!
//! The foreign runtime exports five entry points (see [`abi`]). They are
//! resolved once into a [`BridgeLib`] and reached through the safe
//! [`ForeignRuntime`] trait; raw pointers never leave the loader.
//!
//! [`Bridge`] wraps an initialized runtime. [`Bridge::acquire`] returns the
//! process-wide instance, loading and initializing the library on first use.
//! A failed load is cached and returned to every later caller.

pub mod abi;
pub mod config;
pub mod library;

use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::type_code::TypeCode;
use crate::types::{ExtopError, ExtopResult};

pub use config::BridgeConfig;
pub use library::{BridgeLib, EntryPoints};

/// Opaque handle to one instance living in the foreign runtime.
///
/// Not `Clone`: releasing consumes it, so a handle is released at most once.
#[derive(PartialEq, Eq, Hash)]
pub struct InstanceId(NonNull<c_void>);

// Safety: the handle is never dereferenced on this side; it is only passed
// back to the foreign runtime that produced it.
unsafe impl Send for InstanceId {}
unsafe impl Sync for InstanceId {}

impl InstanceId {
    /// Wrap a non-zero token produced by a foreign runtime.
    pub fn from_token(token: usize) -> Option<Self> {
        NonNull::new(token as *mut c_void).map(InstanceId)
    }

    pub fn token(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub(crate) fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(InstanceId)
    }

    pub(crate) fn as_raw(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({:#x})", self.token())
    }
}

/// Element storage of a borrowed input.
#[derive(Debug, Clone, Copy)]
pub enum InputData<'a> {
    Bytes(&'a [u8]),
    Strings(&'a [CString]),
}

/// One input tensor as seen by the foreign runtime, borrowed for one call.
#[derive(Debug, Clone, Copy)]
pub struct InputView<'a> {
    pub data: InputData<'a>,
    pub type_code: TypeCode,
    pub dims: &'a [i64],
}

/// One output produced by the foreign runtime, copied out of its storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignOutput {
    pub data: Vec<u8>,
    pub elem_size: usize,
    pub dims: Vec<i64>,
}

/// The five foreign entry points.
///
/// Return values follow the foreign convention: `false`/`None` means
/// failure, with the reason available from [`ForeignRuntime::last_error`]
/// until the next failing call anywhere in the runtime.
pub trait ForeignRuntime: Send + Sync {
    fn initialize(&self) -> bool;

    fn new_instance(
        &self,
        module: &CStr,
        class_name: &CStr,
        attrs: &[(CString, CString)],
    ) -> Option<InstanceId>;

    fn invoke(
        &self,
        instance: &InstanceId,
        compute: &CStr,
        inputs: &[InputView<'_>],
        outputs: &mut Vec<ForeignOutput>,
        log: &dyn Fn(&str),
    ) -> bool;

    fn release_instance(&self, instance: InstanceId);

    fn last_error(&self) -> String;
}

struct BridgeInner {
    runtime: Box<dyn ForeignRuntime>,
    call_lock: Option<Mutex<()>>,
}

/// An initialized foreign runtime. Clones share the same runtime.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("serialize_calls", &self.inner.call_lock.is_some())
            .finish()
    }
}

static GLOBAL_BRIDGE: OnceLock<ExtopResult<Bridge>> = OnceLock::new();

impl Bridge {
    /// Get the process-wide bridge, loading the library on first call.
    ///
    /// Exactly one thread performs the load and `Initialize` call; others
    /// block until it completes. The outcome, success or failure, is final
    /// for the life of the process.
    pub fn acquire() -> ExtopResult<Bridge> {
        GLOBAL_BRIDGE
            .get_or_init(|| {
                let config = BridgeConfig::from_env();
                let lib = BridgeLib::load(&config)?;
                Bridge::with_runtime(lib, &config)
            })
            .clone()
    }

    /// Whether the process-wide bridge is available.
    pub fn is_available() -> bool {
        Self::acquire().is_ok()
    }

    /// Initialize `runtime` and wrap it.
    pub fn with_runtime<R: ForeignRuntime + 'static>(
        runtime: R,
        config: &BridgeConfig,
    ) -> ExtopResult<Bridge> {
        let bridge = Bridge {
            inner: Arc::new(BridgeInner {
                runtime: Box::new(runtime),
                call_lock: config.serialize_calls.then(|| Mutex::new(())),
            }),
        };
        bridge.guarded(|rt| {
            if rt.initialize() {
                Ok(())
            } else {
                let message = rt.last_error();
                log::error!("Foreign runtime initialization failed: {message}");
                Err(ExtopError::InitializeFailed(message))
            }
        })?;
        log::info!("Foreign runtime initialized");
        Ok(bridge)
    }

    /// Run `f` against the runtime, under the call lock when serialization
    /// is enabled. A failing call and its last-error read must happen
    /// inside the same `guarded` section.
    fn guarded<T>(&self, f: impl FnOnce(&dyn ForeignRuntime) -> T) -> T {
        let _guard = self
            .inner
            .call_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));
        f(self.inner.runtime.as_ref())
    }

    pub(crate) fn new_instance(
        &self,
        module: &CStr,
        class_name: &CStr,
        attrs: &[(CString, CString)],
    ) -> ExtopResult<InstanceId> {
        self.guarded(|rt| {
            rt.new_instance(module, class_name, attrs)
                .ok_or_else(|| ExtopError::ConstructFailed {
                    module: module.to_string_lossy().into_owned(),
                    class_name: class_name.to_string_lossy().into_owned(),
                    message: rt.last_error(),
                })
        })
    }

    pub(crate) fn invoke(
        &self,
        instance: &InstanceId,
        compute: &CStr,
        inputs: &[InputView<'_>],
        log: &dyn Fn(&str),
    ) -> ExtopResult<Vec<ForeignOutput>> {
        self.guarded(|rt| {
            let mut outputs = Vec::new();
            if rt.invoke(instance, compute, inputs, &mut outputs, log) {
                Ok(outputs)
            } else {
                Err(ExtopError::InvokeFailed {
                    compute: compute.to_string_lossy().into_owned(),
                    message: rt.last_error(),
                })
            }
        })
    }

    /// Release never fails and never touches the last-error channel, so it
    /// does not take the call lock.
    pub(crate) fn release_instance(&self, instance: InstanceId) {
        self.inner.runtime.release_instance(instance);
    }
}
