//! Dynamic loading of the foreign runtime library.
//!
//! Resolves the five entry points into typed function pointers, the same
//! way the HIP and RCCL loaders resolve their tables. The `Library` lives as
//! long as the function table that points into it.

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use libloading::Library;

use super::abi::{
    ExtopAttribute, ExtopInput, InitializeFn, InvokeFn, LastErrorFn, NewInstanceFn,
    ReleaseInstanceFn, SYM_INITIALIZE, SYM_INVOKE, SYM_LAST_ERROR, SYM_NEW_INSTANCE,
    SYM_RELEASE_INSTANCE,
};
use super::{BridgeConfig, ForeignOutput, ForeignRuntime, InputData, InputView, InstanceId};
use crate::types::{ExtopError, ExtopResult};

const LAST_ERROR_INITIAL_CAPACITY: usize = 256;

/// Typed entry-point table.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub initialize: InitializeFn,
    pub new_instance: NewInstanceFn,
    pub invoke: InvokeFn,
    pub release_instance: ReleaseInstanceFn,
    pub last_error: LastErrorFn,
}

/// Foreign runtime library: the loaded image plus its entry points.
pub struct BridgeLib {
    // Keeps the entry points valid; `None` for statically linked tables.
    _lib: Option<Library>,
    entry: EntryPoints,
}

/// Symbol name without its NUL terminator, for error text.
fn symbol_name(symbol: &'static [u8]) -> &'static str {
    let name = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    std::str::from_utf8(name).unwrap_or("<non-utf8 symbol>")
}

/// Resolve one symbol and copy the function pointer out of the borrow.
///
/// # Safety
/// `T` must be the true signature of `symbol` in `lib`.
unsafe fn resolve<T: Copy>(lib: &Library, symbol: &'static [u8]) -> ExtopResult<T> {
    lib.get::<T>(symbol)
        .map(|s| *s)
        .map_err(|e| ExtopError::MissingSymbol {
            symbol: symbol_name(symbol),
            reason: e.to_string(),
        })
}

/// `RTLD_NOW`: unresolved symbols fail the load. `RTLD_GLOBAL`: modules the
/// foreign runtime loads later bind against this library's symbols.
#[cfg(unix)]
unsafe fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL).map(Into::into)
}

#[cfg(not(unix))]
unsafe fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    Library::new(path)
}

impl BridgeLib {
    /// Load the first library in `config.library_paths` that opens, then
    /// resolve all five entry points.
    pub fn load(config: &BridgeConfig) -> ExtopResult<Self> {
        let (path, lib) = config
            .library_paths
            .iter()
            .find_map(|path| match unsafe { open_library(path) } {
                Ok(lib) => Some((path, lib)),
                Err(e) => {
                    log::debug!("Bridge library {} not loaded: {e}", path.display());
                    None
                }
            })
            .ok_or_else(|| ExtopError::LibraryNotFound {
                tried: config
                    .library_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;
        let bridge = Self::from_library(lib)?;
        log::info!("Loaded bridge library: {}", path.display());
        Ok(bridge)
    }

    /// Load one specific library file.
    pub fn load_path(path: impl AsRef<Path>) -> ExtopResult<Self> {
        let config = BridgeConfig {
            library_paths: vec![path.as_ref().to_path_buf()],
            ..BridgeConfig::default()
        };
        Self::load(&config)
    }

    fn from_library(lib: Library) -> ExtopResult<Self> {
        // Resolve everything first, then move lib into the struct.
        let entry = unsafe {
            EntryPoints {
                initialize: resolve::<InitializeFn>(&lib, SYM_INITIALIZE)?,
                new_instance: resolve::<NewInstanceFn>(&lib, SYM_NEW_INSTANCE)?,
                invoke: resolve::<InvokeFn>(&lib, SYM_INVOKE)?,
                release_instance: resolve::<ReleaseInstanceFn>(&lib, SYM_RELEASE_INSTANCE)?,
                last_error: resolve::<LastErrorFn>(&lib, SYM_LAST_ERROR)?,
            }
        };
        Ok(BridgeLib {
            _lib: Some(lib),
            entry,
        })
    }

    /// Use entry points linked into the current binary.
    pub fn from_entry_points(entry: EntryPoints) -> Self {
        BridgeLib { _lib: None, entry }
    }
}

/// Collects outputs pushed by the callee.
struct OutputSink<'a> {
    outputs: &'a mut Vec<ForeignOutput>,
}

unsafe extern "C" fn push_output(
    sink: *mut c_void,
    data: *const c_void,
    byte_len: usize,
    elem_size: usize,
    dims: *const i64,
    ndim: usize,
) -> bool {
    if sink.is_null() {
        return false;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let sink = &mut *(sink as *mut OutputSink<'_>);
        // A malformed push is recorded with empty storage so output
        // validation rejects it by index.
        let mut well_formed = true;
        let data = if byte_len == 0 {
            Vec::new()
        } else if data.is_null() {
            well_formed = false;
            Vec::new()
        } else {
            std::slice::from_raw_parts(data as *const u8, byte_len).to_vec()
        };
        let dims = if ndim == 0 {
            Vec::new()
        } else if dims.is_null() {
            well_formed = false;
            vec![-1]
        } else {
            std::slice::from_raw_parts(dims, ndim).to_vec()
        };
        sink.outputs.push(ForeignOutput {
            data,
            elem_size,
            dims,
        });
        well_formed
    }))
    .unwrap_or(false)
}

unsafe extern "C" fn forward_log(ctx: *mut c_void, msg: *const c_char) {
    if ctx.is_null() || msg.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let log = &*(ctx as *const &dyn Fn(&str));
        log(&CStr::from_ptr(msg).to_string_lossy());
    }));
}

impl ForeignRuntime for BridgeLib {
    fn initialize(&self) -> bool {
        unsafe { (self.entry.initialize)() }
    }

    fn new_instance(
        &self,
        module: &CStr,
        class_name: &CStr,
        attrs: &[(CString, CString)],
    ) -> Option<InstanceId> {
        let raw_attrs: Vec<ExtopAttribute> = attrs
            .iter()
            .map(|(k, v)| ExtopAttribute {
                key: k.as_ptr(),
                value: v.as_ptr(),
            })
            .collect();
        let ptr = unsafe {
            (self.entry.new_instance)(
                module.as_ptr(),
                class_name.as_ptr(),
                raw_attrs.as_ptr(),
                raw_attrs.len(),
            )
        };
        InstanceId::from_raw(ptr)
    }

    fn invoke(
        &self,
        instance: &InstanceId,
        compute: &CStr,
        inputs: &[InputView<'_>],
        outputs: &mut Vec<ForeignOutput>,
        log: &dyn Fn(&str),
    ) -> bool {
        // Pointer tables for string inputs; they borrow the tensors' CStrings.
        let string_tables: Vec<Vec<*const c_char>> = inputs
            .iter()
            .map(|input| match input.data {
                InputData::Strings(strings) => strings.iter().map(|s| s.as_ptr()).collect(),
                InputData::Bytes(_) => Vec::new(),
            })
            .collect();
        let raw_inputs: Vec<ExtopInput> = inputs
            .iter()
            .zip(&string_tables)
            .map(|(input, table)| ExtopInput {
                data: match input.data {
                    InputData::Bytes(bytes) => bytes.as_ptr() as *const c_void,
                    InputData::Strings(_) => table.as_ptr() as *const c_void,
                },
                type_code: input.type_code,
                dims: input.dims.as_ptr(),
                ndim: input.dims.len(),
            })
            .collect();

        let mut sink = OutputSink { outputs };
        let log_ref: &dyn Fn(&str) = log;
        unsafe {
            (self.entry.invoke)(
                instance.as_raw(),
                compute.as_ptr(),
                raw_inputs.as_ptr(),
                raw_inputs.len(),
                &mut sink as *mut OutputSink<'_> as *mut c_void,
                push_output,
                &log_ref as *const &dyn Fn(&str) as *mut c_void,
                forward_log,
            )
        }
    }

    fn release_instance(&self, instance: InstanceId) {
        unsafe { (self.entry.release_instance)(instance.as_raw()) }
    }

    fn last_error(&self) -> String {
        let mut buf = vec![0u8; LAST_ERROR_INITIAL_CAPACITY];
        let needed = unsafe { (self.entry.last_error)(buf.as_mut_ptr() as *mut c_char, buf.len()) };
        if needed >= buf.len() {
            buf = vec![0u8; needed + 1];
            unsafe { (self.entry.last_error)(buf.as_mut_ptr() as *mut c_char, buf.len()) };
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }
}
