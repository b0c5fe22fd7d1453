//! Reference foreign runtime for gllm-extop.
//!
//! Exports the five bridge entry points as `#[no_mangle] extern "C"`
//! functions and hosts the classes in [`classes`] under module
//! `extop.builtin`. Built as a `cdylib` it is loadable by the bridge;
//! as an `rlib` its entry points can be linked directly.
//!
//! The last error is process-global, as the bridge contract requires:
//! every failing call overwrites it.

#![allow(non_snake_case)]

pub mod classes;

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use classes::{Input, InputData, OpClass, CODE_STRING};

/// Mirror of the host's attribute layout.
#[repr(C)]
pub struct RefAttribute {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Mirror of the host's input layout.
#[repr(C)]
pub struct RefInput {
    pub data: *const c_void,
    pub type_code: i32,
    pub dims: *const i64,
    pub ndim: usize,
}

pub type PushOutputFn = unsafe extern "C" fn(
    sink: *mut c_void,
    data: *const c_void,
    byte_len: usize,
    elem_size: usize,
    dims: *const i64,
    ndim: usize,
) -> bool;

pub type LogFn = unsafe extern "C" fn(ctx: *mut c_void, msg: *const c_char);

static LAST_ERROR: Mutex<String> = Mutex::new(String::new());
static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
static LIVE_INSTANCES: AtomicUsize = AtomicUsize::new(0);
static INVOKE_CALLS: AtomicUsize = AtomicUsize::new(0);

fn set_error(msg: impl Into<String>) {
    let msg = msg.into();
    log::debug!("extop-ref error: {msg}");
    *LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner()) = msg;
}

/// Number of `Initialize` calls so far.
pub fn initialize_calls() -> usize {
    INIT_CALLS.load(Ordering::SeqCst)
}

/// Instances constructed and not yet released.
pub fn live_instances() -> usize {
    LIVE_INSTANCES.load(Ordering::SeqCst)
}

/// Number of `InvokeCompute` calls so far.
pub fn invoke_calls() -> usize {
    INVOKE_CALLS.load(Ordering::SeqCst)
}

struct Instance {
    name: String,
    class: Mutex<Box<dyn OpClass>>,
}

unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| format!("{what} is not valid UTF-8"))
}

/// Start the runtime. Idempotent.
#[no_mangle]
pub extern "C" fn Initialize() -> bool {
    INIT_CALLS.fetch_add(1, Ordering::SeqCst);
    true
}

/// [`initialize_calls`] for hosts that only see the dynamic library.
#[no_mangle]
pub extern "C" fn ExtopRefInitializeCalls() -> usize {
    initialize_calls()
}

/// [`live_instances`] for hosts that only see the dynamic library.
#[no_mangle]
pub extern "C" fn ExtopRefLiveInstances() -> usize {
    live_instances()
}

/// Construct `module.class_name`. Returns null and sets the last error on failure.
///
/// # Safety
/// `module` and `class_name` must be NUL-terminated strings; `attrs` must
/// point to `attr_count` attributes whose strings are NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn NewInstance(
    module: *const c_char,
    class_name: *const c_char,
    attrs: *const RefAttribute,
    attr_count: usize,
) -> *mut c_void {
    let result = catch_unwind(AssertUnwindSafe(|| -> Result<*mut c_void, String> {
        let module = c_str(module, "module")?;
        let class_name = c_str(class_name, "class name")?;
        let mut map = HashMap::with_capacity(attr_count);
        if attr_count > 0 {
            if attrs.is_null() {
                return Err("attributes pointer is null".into());
            }
            for attr in std::slice::from_raw_parts(attrs, attr_count) {
                let key = c_str(attr.key, "attribute name")?;
                let value = c_str(attr.value, "attribute value")?;
                map.insert(key.to_string(), value.to_string());
            }
        }
        let class = classes::construct(module, class_name, &map)?;
        let instance = Box::new(Instance {
            name: format!("{module}.{class_name}"),
            class: Mutex::new(class),
        });
        LIVE_INSTANCES.fetch_add(1, Ordering::SeqCst);
        Ok(Box::into_raw(instance) as *mut c_void)
    }));
    match result {
        Ok(Ok(ptr)) => ptr,
        Ok(Err(msg)) => {
            set_error(msg);
            std::ptr::null_mut()
        }
        Err(_) => {
            set_error("NewInstance panicked");
            std::ptr::null_mut()
        }
    }
}

unsafe fn read_inputs<'a>(inputs: *const RefInput, count: usize) -> Result<Vec<Input<'a>>, String> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if inputs.is_null() {
        return Err("inputs pointer is null".into());
    }
    let mut out = Vec::with_capacity(count);
    for (i, raw) in std::slice::from_raw_parts(inputs, count).iter().enumerate() {
        let dims = if raw.ndim == 0 {
            Vec::new()
        } else if raw.dims.is_null() {
            return Err(format!("input {i}: dims pointer is null"));
        } else {
            std::slice::from_raw_parts(raw.dims, raw.ndim).to_vec()
        };
        let mut elements = 1usize;
        for &d in &dims {
            let d = usize::try_from(d).map_err(|_| format!("input {i}: negative dimension"))?;
            elements = elements
                .checked_mul(d)
                .ok_or_else(|| format!("input {i}: shape overflows"))?;
        }
        let data = if raw.type_code == CODE_STRING {
            let mut strings = Vec::with_capacity(elements);
            if elements > 0 {
                if raw.data.is_null() {
                    return Err(format!("input {i}: data pointer is null"));
                }
                let table = std::slice::from_raw_parts(raw.data as *const *const c_char, elements);
                for &s in table {
                    strings.push(c_str(s, "string element")?.to_string());
                }
            }
            InputData::Strings(strings)
        } else {
            let width = classes::code_width(raw.type_code)
                .ok_or_else(|| format!("input {i}: unknown type code {}", raw.type_code))?;
            let len = elements * width;
            if len == 0 {
                InputData::Bytes(&[])
            } else if raw.data.is_null() {
                return Err(format!("input {i}: data pointer is null"));
            } else {
                InputData::Bytes(std::slice::from_raw_parts(raw.data as *const u8, len))
            }
        };
        out.push(Input {
            type_code: raw.type_code,
            dims,
            data,
        });
    }
    Ok(out)
}

/// Run method `compute` of `instance`.
///
/// Outputs are handed to `push_output` one at a time and freed right after.
///
/// # Safety
/// `instance` must come from [`NewInstance`] and not be released; `inputs`
/// must point to `input_count` valid inputs; callbacks must be valid.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn InvokeCompute(
    instance: *mut c_void,
    compute: *const c_char,
    inputs: *const RefInput,
    input_count: usize,
    output_sink: *mut c_void,
    push_output: PushOutputFn,
    log_ctx: *mut c_void,
    log: LogFn,
) -> bool {
    INVOKE_CALLS.fetch_add(1, Ordering::SeqCst);
    let result = catch_unwind(AssertUnwindSafe(|| -> Result<(), String> {
        if instance.is_null() {
            return Err("instance is null".into());
        }
        let instance = &*(instance as *const Instance);
        let method = c_str(compute, "compute name")?;
        if method != classes::COMPUTE {
            return Err(format!("{} has no method '{method}'", instance.name));
        }
        let inputs = read_inputs(inputs, input_count)?;
        let emit = |msg: &str| {
            let line = format!("{msg}\0");
            log(log_ctx, line.as_ptr() as *const c_char);
        };
        let outputs = instance
            .class
            .lock()
            .map_err(|_| format!("{} is poisoned", instance.name))?
            .compute(&inputs, &emit)?;
        for (i, out) in outputs.into_iter().enumerate() {
            let accepted = push_output(
                output_sink,
                out.bytes.as_ptr() as *const c_void,
                out.bytes.len(),
                out.elem_size,
                out.dims.as_ptr(),
                out.dims.len(),
            );
            if !accepted {
                return Err(format!("output {i} rejected by host"));
            }
        }
        Ok(())
    }));
    match result {
        Ok(Ok(())) => true,
        Ok(Err(msg)) => {
            set_error(msg);
            false
        }
        Err(_) => {
            set_error("InvokeCompute panicked");
            false
        }
    }
}

/// Destroy an instance. Null is ignored.
///
/// # Safety
/// `instance` must come from [`NewInstance`] and be released only once.
#[no_mangle]
pub unsafe extern "C" fn ReleaseInstance(instance: *mut c_void) {
    if instance.is_null() {
        return;
    }
    drop(Box::from_raw(instance as *mut Instance));
    LIVE_INSTANCES.fetch_sub(1, Ordering::SeqCst);
}

/// Copy the last error into `buf` and return its full length.
///
/// # Safety
/// `buf` must point to `capacity` writable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn GetLastErrorMessage(buf: *mut c_char, capacity: usize) -> usize {
    let msg = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    let bytes = msg.as_bytes();
    if !buf.is_null() && capacity > 0 {
        let n = bytes.len().min(capacity - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, n);
        *buf.add(n) = 0;
    }
    bytes.len()
}
