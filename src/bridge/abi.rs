//! C ABI of the five foreign entry points.
//!
//! A foreign runtime library exports these symbols with exactly these
//! signatures. Nothing here is checked by a shared type system; the layout
//! below is the contract.

use std::ffi::{c_char, c_void};

/// One string attribute passed to the instance constructor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExtopAttribute {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// One borrowed input tensor.
///
/// For fixed-width types `data` points at contiguous element storage.
/// For strings (type code 18) it points at an array of NUL-terminated
/// `char*`, one per element.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExtopInput {
    pub data: *const c_void,
    pub type_code: i32,
    pub dims: *const i64,
    pub ndim: usize,
}

/// Output callback handed to `InvokeCompute`.
///
/// The callee calls it once per output, in order. `data` must stay valid
/// only for the duration of the call; the bridge copies it. Returns false
/// when the bridge rejected the output.
pub type ExtopPushOutputFn = unsafe extern "C" fn(
    sink: *mut c_void,
    data: *const c_void,
    byte_len: usize,
    elem_size: usize,
    dims: *const i64,
    ndim: usize,
) -> bool;

/// Logging callback handed to `InvokeCompute`.
pub type ExtopLogFn = unsafe extern "C" fn(ctx: *mut c_void, msg: *const c_char);

/// `bool Initialize(void)`
pub type InitializeFn = unsafe extern "C" fn() -> bool;

/// `void* NewInstance(module, class_name, attrs, attr_count)`; null on failure.
pub type NewInstanceFn = unsafe extern "C" fn(
    module: *const c_char,
    class_name: *const c_char,
    attrs: *const ExtopAttribute,
    attr_count: usize,
) -> *mut c_void;

/// `bool InvokeCompute(...)`; false on failure.
pub type InvokeFn = unsafe extern "C" fn(
    instance: *mut c_void,
    compute: *const c_char,
    inputs: *const ExtopInput,
    input_count: usize,
    output_sink: *mut c_void,
    push_output: ExtopPushOutputFn,
    log_ctx: *mut c_void,
    log: ExtopLogFn,
) -> bool;

/// `void ReleaseInstance(void*)`; must not fail.
pub type ReleaseInstanceFn = unsafe extern "C" fn(instance: *mut c_void);

/// `size_t GetLastErrorMessage(char* buf, size_t capacity)`
///
/// Writes at most `capacity - 1` bytes plus a NUL terminator and returns the
/// full message length, excluding the terminator.
pub type LastErrorFn = unsafe extern "C" fn(buf: *mut c_char, capacity: usize) -> usize;

pub const SYM_INITIALIZE: &[u8] = b"Initialize\0";
pub const SYM_NEW_INSTANCE: &[u8] = b"NewInstance\0";
pub const SYM_INVOKE: &[u8] = b"InvokeCompute\0";
pub const SYM_RELEASE_INSTANCE: &[u8] = b"ReleaseInstance\0";
pub const SYM_LAST_ERROR: &[u8] = b"GetLastErrorMessage\0";
