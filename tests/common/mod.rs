//! Shared fixtures: the extop-ref runtime linked in-process, and an
//! instrumented stub runtime that counts every entry-point call.

#![allow(dead_code)]

use std::collections::HashMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use gllm_extop::bridge::abi::{InvokeFn, NewInstanceFn};
use gllm_extop::{
    Bridge, BridgeConfig, BridgeLib, EntryPoints, ForeignOutput, ForeignRuntime, InputData,
    InputView, InstanceId,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ═══════════════════════════════════════════════════════════════════════
// extop-ref linked as an rlib
// ═══════════════════════════════════════════════════════════════════════

type RefNewInstance = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    *const extop_ref::RefAttribute,
    usize,
) -> *mut c_void;

type RefInvoke = unsafe extern "C" fn(
    *mut c_void,
    *const c_char,
    *const extop_ref::RefInput,
    usize,
    *mut c_void,
    extop_ref::PushOutputFn,
    *mut c_void,
    extop_ref::LogFn,
) -> bool;

/// The reference runtime's entry points, as symbol lookup would return them.
pub fn ref_entry_points() -> EntryPoints {
    // Safety: RefAttribute/RefInput are repr(C) mirrors of the host layouts;
    // this is the same reinterpretation a dlsym lookup performs.
    unsafe {
        EntryPoints {
            initialize: extop_ref::Initialize,
            new_instance: std::mem::transmute::<RefNewInstance, NewInstanceFn>(
                extop_ref::NewInstance,
            ),
            invoke: std::mem::transmute::<RefInvoke, InvokeFn>(extop_ref::InvokeCompute),
            release_instance: extop_ref::ReleaseInstance,
            last_error: extop_ref::GetLastErrorMessage,
        }
    }
}

/// The extop-ref dynamic library cargo builds next to the test binaries.
pub fn ref_cdylib_path() -> PathBuf {
    let name = format!("{DLL_PREFIX}extop_ref{DLL_SUFFIX}");
    let exe = std::env::current_exe().expect("test binary path");
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| panic!("{name} not found next to {}", exe.display()))
}

/// Read a counter exported by the loaded extop-ref library.
pub fn ref_cdylib_counter(symbol: &[u8]) -> usize {
    // Safety: the counters are `extern "C" fn() -> usize`; opening an
    // already loaded library returns the same image.
    unsafe {
        let lib = libloading::Library::new(ref_cdylib_path()).expect("extop-ref cdylib");
        let counter = lib
            .get::<unsafe extern "C" fn() -> usize>(symbol)
            .expect("extop-ref counter symbol");
        counter()
    }
}

/// One serialized bridge over extop-ref, shared by every test in the binary
/// so failing calls and their last-error reads never interleave.
pub fn ref_bridge() -> Bridge {
    static BRIDGE: OnceLock<Bridge> = OnceLock::new();
    BRIDGE
        .get_or_init(|| {
            init_logging();
            Bridge::with_runtime(
                BridgeLib::from_entry_points(ref_entry_points()),
                &BridgeConfig::default(),
            )
            .expect("extop-ref initializes")
        })
        .clone()
}

// ═══════════════════════════════════════════════════════════════════════
// Instrumented stub runtime
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct Counters {
    pub initialize: AtomicUsize,
    pub new_instance: AtomicUsize,
    pub invoke: AtomicUsize,
    pub release: AtomicUsize,
    pub last_error: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Classes:
/// - `Double`: one f32 output per f32 input, elements doubled
/// - `Fail`: every invoke fails with `stub: compute failed`
/// - `BadOutput`: a valid f32 output followed by a truncated one
/// - `Reject`: construction fails
/// - anything else: no outputs
pub struct StubRuntime {
    pub counters: Arc<Counters>,
    init_ok: bool,
    next_token: AtomicUsize,
    live: Mutex<HashMap<usize, String>>,
    released: Mutex<Vec<usize>>,
    last_error: Mutex<String>,
}

impl StubRuntime {
    pub fn new() -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            StubRuntime {
                counters: counters.clone(),
                init_ok: true,
                next_token: AtomicUsize::new(1),
                live: Mutex::new(HashMap::new()),
                released: Mutex::new(Vec::new()),
                last_error: Mutex::new(String::new()),
            },
            counters,
        )
    }

    pub fn failing_init() -> (Self, Arc<Counters>) {
        let (mut stub, counters) = Self::new();
        stub.init_ok = false;
        *stub.last_error.lock().unwrap() = "stub: interpreter missing".into();
        (stub, counters)
    }

    fn fail(&self, msg: impl Into<String>) {
        *self.last_error.lock().unwrap() = msg.into();
    }
}

fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

impl ForeignRuntime for StubRuntime {
    fn initialize(&self) -> bool {
        self.counters.initialize.fetch_add(1, Ordering::SeqCst);
        self.init_ok
    }

    fn new_instance(
        &self,
        _module: &CStr,
        class_name: &CStr,
        _attrs: &[(CString, CString)],
    ) -> Option<InstanceId> {
        self.counters.new_instance.fetch_add(1, Ordering::SeqCst);
        let class = class_name.to_string_lossy().into_owned();
        if class == "Reject" {
            self.fail("stub: cannot build Reject");
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) * 16;
        self.live.lock().unwrap().insert(token, class);
        InstanceId::from_token(token)
    }

    fn invoke(
        &self,
        instance: &InstanceId,
        _compute: &CStr,
        inputs: &[InputView<'_>],
        outputs: &mut Vec<ForeignOutput>,
        log: &dyn Fn(&str),
    ) -> bool {
        self.counters.invoke.fetch_add(1, Ordering::SeqCst);
        let class = match self.live.lock().unwrap().get(&instance.token()) {
            Some(class) => class.clone(),
            None => {
                self.fail(format!("stub: instance {:#x} released", instance.token()));
                return false;
            }
        };
        log(&format!("{class}: {} inputs", inputs.len()));
        match class.as_str() {
            "Fail" => {
                self.fail("stub: compute failed");
                false
            }
            "Double" => {
                for input in inputs {
                    let InputData::Bytes(bytes) = input.data else {
                        self.fail("stub: Double needs numeric input");
                        return false;
                    };
                    let doubled: Vec<f32> = f32s(bytes).iter().map(|v| v * 2.0).collect();
                    outputs.push(ForeignOutput {
                        data: f32_bytes(&doubled),
                        elem_size: 4,
                        dims: input.dims.to_vec(),
                    });
                }
                true
            }
            "BadOutput" => {
                outputs.push(ForeignOutput {
                    data: f32_bytes(&[1.0, 2.0]),
                    elem_size: 4,
                    dims: vec![2],
                });
                outputs.push(ForeignOutput {
                    data: f32_bytes(&[1.0]),
                    elem_size: 4,
                    dims: vec![2],
                });
                true
            }
            _ => true,
        }
    }

    fn release_instance(&self, instance: InstanceId) {
        self.counters.release.fetch_add(1, Ordering::SeqCst);
        let token = instance.token();
        self.live.lock().unwrap().remove(&token);
        self.released.lock().unwrap().push(token);
    }

    fn last_error(&self) -> String {
        self.counters.last_error.fetch_add(1, Ordering::SeqCst);
        self.last_error.lock().unwrap().clone()
    }
}
