//! `dlopen`-based implementation of [`BackendOps`] against the real
//! `libjack.so`.
//!
//! Grounded directly in wineasio's `jackbridge.c`: a `dlopen` of the
//! shared library, `dlsym` for every entry point, each one preserved as an
//! `Option<fn>` so a missing symbol degrades to a safe default instead of
//! refusing to load. Resolution happens once per process and is never torn
//! down — see spec §9 on the symbol table's process-wide lifetime.

use super::{
    BackendOps, ClientHandle, LatencyRange, LatencyType, PortDirection, PortHandle,
    RawProcessCallback, RawShutdownCallback, RawSizeCallback, RawThreadCreator, TransportState,
};
use libloading::{Library, Symbol};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::sync::OnceLock;

const CANDIDATE_NAMES: &[&str] = &["libjack.so.0", "libjack.so", "libjack64.dll", "libjack.dll"];

// `jack_client_open` is technically variadic in the C header (trailing
// `jack_status_t*` plus legacy server-name args nobody passes anymore);
// binding it as a fixed 3-argument function matches how every caller in
// this crate invokes it and avoids requiring the unstable `c_variadic`
// feature for the function-pointer type.
type FnClientOpen = unsafe extern "C" fn(*const c_char, u32, *mut i32) -> *mut c_void;
type FnClientClose = unsafe extern "C" fn(*mut c_void) -> i32;
type FnGetClientName = unsafe extern "C" fn(*mut c_void) -> *mut c_char;
type FnActivate = unsafe extern "C" fn(*mut c_void) -> i32;
type FnIsRealtime = unsafe extern "C" fn(*mut c_void) -> i32;
type FnGetSampleRate = unsafe extern "C" fn(*mut c_void) -> u32;
type FnGetBufferSize = unsafe extern "C" fn(*mut c_void) -> u32;
type FnSetBufferSize = unsafe extern "C" fn(*mut c_void, u32) -> i32;
type FnSetProcessCallback = unsafe extern "C" fn(*mut c_void, RawProcessCallback, *mut c_void) -> i32;
type FnSetSizeCallback = unsafe extern "C" fn(*mut c_void, RawSizeCallback, *mut c_void) -> i32;
type FnSetShutdownCallback = unsafe extern "C" fn(*mut c_void, RawShutdownCallback, *mut c_void);
type FnSetThreadCreator = unsafe extern "C" fn(RawThreadCreator);
type FnPortRegister = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, u64, u64) -> *mut c_void;
type FnPortUnregister = unsafe extern "C" fn(*mut c_void, *mut c_void) -> i32;
type FnPortName = unsafe extern "C" fn(*const c_void) -> *const c_char;
type FnPortGetLatencyRange = unsafe extern "C" fn(*mut c_void, u32, *mut [u32; 2]);
type FnPortByName = unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void;
type FnPortType = unsafe extern "C" fn(*const c_void) -> *const c_char;
type FnGetPorts = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, u64) -> *mut *const c_char;
type FnConnect = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> i32;
type FnTransportQuery = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
type FnFree = unsafe extern "C" fn(*mut c_void);
type FnPortGetBuffer = unsafe extern "C" fn(*mut c_void, u32) -> *mut c_void;

macro_rules! resolve {
    ($lib:expr, $ty:ty, $name:literal) => {
        unsafe { $lib.get::<$ty>($name).ok().map(|s: Symbol<$ty>| *s) }
    };
}

struct Symbols {
    client_open: Option<FnClientOpen>,
    client_close: Option<FnClientClose>,
    get_client_name: Option<FnGetClientName>,
    activate: Option<FnActivate>,
    deactivate: Option<FnActivate>,
    is_realtime: Option<FnIsRealtime>,
    get_sample_rate: Option<FnGetSampleRate>,
    get_buffer_size: Option<FnGetBufferSize>,
    set_buffer_size: Option<FnSetBufferSize>,
    set_process_callback: Option<FnSetProcessCallback>,
    set_buffer_size_callback: Option<FnSetSizeCallback>,
    set_sample_rate_callback: Option<FnSetSizeCallback>,
    set_latency_callback: Option<FnSetSizeCallback>,
    set_shutdown_callback: Option<FnSetShutdownCallback>,
    set_thread_creator: Option<FnSetThreadCreator>,
    port_register: Option<FnPortRegister>,
    port_unregister: Option<FnPortUnregister>,
    port_name: Option<FnPortName>,
    port_get_latency_range: Option<FnPortGetLatencyRange>,
    port_by_name: Option<FnPortByName>,
    port_type: Option<FnPortType>,
    get_ports: Option<FnGetPorts>,
    connect: Option<FnConnect>,
    transport_query: Option<FnTransportQuery>,
    free: Option<FnFree>,
    port_get_buffer: Option<FnPortGetBuffer>,
    // Kept alive for the process lifetime; never dropped (see module docs).
    _library: Library,
}

impl Symbols {
    fn load() -> Option<Symbols> {
        let mut last_err = None;
        for name in CANDIDATE_NAMES {
            match unsafe { Library::new(name) } {
                Ok(lib) => return Some(Symbols::resolve_all(lib)),
                Err(e) => last_err = Some(e),
            }
        }
        if let Some(e) = last_err {
            tracing::warn!(error = %e, "libjack not found under any candidate name");
        }
        None
    }

    fn resolve_all(lib: Library) -> Symbols {
        let client_open = resolve!(lib, FnClientOpen, b"jack_client_open\0");
        let client_close = resolve!(lib, FnClientClose, b"jack_client_close\0");
        let get_client_name = resolve!(lib, FnGetClientName, b"jack_get_client_name\0");
        let activate = resolve!(lib, FnActivate, b"jack_activate\0");
        let deactivate = resolve!(lib, FnActivate, b"jack_deactivate\0");
        let is_realtime = resolve!(lib, FnIsRealtime, b"jack_is_realtime\0");
        let get_sample_rate = resolve!(lib, FnGetSampleRate, b"jack_get_sample_rate\0");
        let get_buffer_size = resolve!(lib, FnGetBufferSize, b"jack_get_buffer_size\0");
        let set_buffer_size = resolve!(lib, FnSetBufferSize, b"jack_set_buffer_size\0");
        let set_process_callback = resolve!(lib, FnSetProcessCallback, b"jack_set_process_callback\0");
        let set_buffer_size_callback = resolve!(lib, FnSetSizeCallback, b"jack_set_buffer_size_callback\0");
        let set_sample_rate_callback = resolve!(lib, FnSetSizeCallback, b"jack_set_sample_rate_callback\0");
        let set_latency_callback = resolve!(lib, FnSetSizeCallback, b"jack_set_latency_callback\0");
        let set_shutdown_callback = resolve!(lib, FnSetShutdownCallback, b"jack_on_info_shutdown\0");
        let set_thread_creator = resolve!(lib, FnSetThreadCreator, b"jack_set_thread_creator\0");
        let port_register = resolve!(lib, FnPortRegister, b"jack_port_register\0");
        let port_unregister = resolve!(lib, FnPortUnregister, b"jack_port_unregister\0");
        let port_name = resolve!(lib, FnPortName, b"jack_port_name\0");
        let port_get_latency_range = resolve!(lib, FnPortGetLatencyRange, b"jack_port_get_latency_range\0");
        let port_by_name = resolve!(lib, FnPortByName, b"jack_port_by_name\0");
        let port_type = resolve!(lib, FnPortType, b"jack_port_type\0");
        let get_ports = resolve!(lib, FnGetPorts, b"jack_get_ports\0");
        let connect = resolve!(lib, FnConnect, b"jack_connect\0");
        let transport_query = resolve!(lib, FnTransportQuery, b"jack_transport_query\0");
        let free = resolve!(lib, FnFree, b"jack_free\0");
        let port_get_buffer = resolve!(lib, FnPortGetBuffer, b"jack_port_get_buffer\0");

        Symbols {
            client_open,
            client_close,
            get_client_name,
            activate,
            deactivate,
            is_realtime,
            get_sample_rate,
            get_buffer_size,
            set_buffer_size,
            set_process_callback,
            set_buffer_size_callback,
            set_sample_rate_callback,
            set_latency_callback,
            set_shutdown_callback,
            set_thread_creator,
            port_register,
            port_unregister,
            port_name,
            port_get_latency_range,
            port_by_name,
            port_type,
            get_ports,
            connect,
            transport_query,
            free,
            port_get_buffer,
            _library: lib,
        }
    }
}

// `Library` and the raw `extern "C" fn` pointers are all safe to share
// read-only across threads once resolved; nothing here is ever mutated
// after `load()` returns.
unsafe impl Send for Symbols {}
unsafe impl Sync for Symbols {}

/// Process-wide, lazily-resolved symbol table. Never freed — see spec §9:
/// "the symbol table is process-wide, initialized lazily on first call,
/// never freed (to avoid use-after-close across multiple driver instances
/// over the process lifetime)".
static SYMBOLS: OnceLock<Option<Symbols>> = OnceLock::new();

fn symbols() -> Option<&'static Symbols> {
    SYMBOLS.get_or_init(Symbols::load).as_ref()
}

fn to_cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| CString::new("").unwrap())
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// The production [`BackendOps`] implementation: a thin, null-safe wrapper
/// over the process-wide symbol table.
#[derive(Debug, Default, Clone, Copy)]
pub struct JackLibrary;

impl JackLibrary {
    /// Constructs the handle. Does not itself trigger resolution —
    /// resolution happens lazily on first use, per spec §9.
    pub fn new() -> Self {
        JackLibrary
    }
}

impl BackendOps for JackLibrary {
    fn is_ok(&self) -> bool {
        symbols().map(|s| s.client_open.is_some()).unwrap_or(false)
    }

    fn client_open(&self, name: &str, autostart: bool) -> Option<ClientHandle> {
        let f = symbols()?.client_open?;
        let cname = to_cstring(name);
        // JackNullOption = 0, JackNoStartServer = 0x01
        let options: u32 = if autostart { 0 } else { 0x01 };
        let mut status: i32 = 0;
        let ptr = unsafe { f(cname.as_ptr(), options, &mut status) };
        if ptr.is_null() {
            None
        } else {
            Some(ClientHandle(ptr))
        }
    }

    fn client_close(&self, client: ClientHandle) -> bool {
        symbols().and_then(|s| s.client_close).map(|f| unsafe { f(client.0) == 0 }).unwrap_or(false)
    }

    fn get_client_name(&self, client: ClientHandle) -> Option<String> {
        let f = symbols()?.get_client_name?;
        unsafe { cstr_to_string(f(client.0)) }
    }

    fn activate(&self, client: ClientHandle) -> bool {
        symbols().and_then(|s| s.activate).map(|f| unsafe { f(client.0) == 0 }).unwrap_or(false)
    }

    fn deactivate(&self, client: ClientHandle) -> bool {
        symbols().and_then(|s| s.deactivate).map(|f| unsafe { f(client.0) == 0 }).unwrap_or(false)
    }

    fn is_realtime(&self, client: ClientHandle) -> bool {
        symbols().and_then(|s| s.is_realtime).map(|f| unsafe { f(client.0) != 0 }).unwrap_or(false)
    }

    fn get_sample_rate(&self, client: ClientHandle) -> Option<f64> {
        let f = symbols()?.get_sample_rate?;
        Some(unsafe { f(client.0) } as f64)
    }

    fn get_buffer_size(&self, client: ClientHandle) -> Option<u32> {
        let f = symbols()?.get_buffer_size?;
        Some(unsafe { f(client.0) })
    }

    fn set_buffer_size(&self, client: ClientHandle, frames: u32) -> bool {
        symbols()
            .and_then(|s| s.set_buffer_size)
            .map(|f| unsafe { f(client.0, frames) == 0 })
            .unwrap_or(false)
    }

    fn set_process_callback(&self, client: ClientHandle, cb: RawProcessCallback, arg: *mut c_void) -> bool {
        symbols()
            .and_then(|s| s.set_process_callback)
            .map(|f| unsafe { f(client.0, cb, arg) == 0 })
            .unwrap_or(false)
    }

    fn set_buffer_size_callback(&self, client: ClientHandle, cb: RawSizeCallback, arg: *mut c_void) -> bool {
        symbols()
            .and_then(|s| s.set_buffer_size_callback)
            .map(|f| unsafe { f(client.0, cb, arg) == 0 })
            .unwrap_or(false)
    }

    fn set_sample_rate_callback(&self, client: ClientHandle, cb: RawSizeCallback, arg: *mut c_void) -> bool {
        symbols()
            .and_then(|s| s.set_sample_rate_callback)
            .map(|f| unsafe { f(client.0, cb, arg) == 0 })
            .unwrap_or(false)
    }

    fn set_latency_callback(&self, client: ClientHandle, cb: RawSizeCallback, arg: *mut c_void) -> bool {
        symbols()
            .and_then(|s| s.set_latency_callback)
            .map(|f| unsafe { f(client.0, cb, arg) == 0 })
            .unwrap_or(false)
    }

    fn set_shutdown_callback(&self, client: ClientHandle, cb: RawShutdownCallback, arg: *mut c_void) {
        if let Some(f) = symbols().and_then(|s| s.set_shutdown_callback) {
            unsafe { f(client.0, cb, arg) }
        }
    }

    fn set_thread_creator(&self, creator: RawThreadCreator) -> bool {
        if let Some(f) = symbols().and_then(|s| s.set_thread_creator) {
            unsafe { f(creator) };
            true
        } else {
            false
        }
    }

    fn port_register(&self, client: ClientHandle, name: &str, direction: PortDirection) -> Option<PortHandle> {
        let f = symbols()?.port_register?;
        let cname = to_cstring(name);
        // JACK_DEFAULT_AUDIO_TYPE
        let ctype = to_cstring("32 bit float mono audio");
        let flags: u64 = match direction {
            PortDirection::Input => 0x1,  // JackPortIsInput
            PortDirection::Output => 0x2, // JackPortIsOutput
        };
        let ptr = unsafe { f(client.0, cname.as_ptr(), ctype.as_ptr(), flags, 0) };
        if ptr.is_null() {
            None
        } else {
            Some(PortHandle(ptr))
        }
    }

    fn port_unregister(&self, client: ClientHandle, port: PortHandle) -> bool {
        symbols()
            .and_then(|s| s.port_unregister)
            .map(|f| unsafe { f(client.0, port.0) == 0 })
            .unwrap_or(false)
    }

    fn port_name(&self, port: PortHandle) -> Option<String> {
        let f = symbols()?.port_name?;
        unsafe { cstr_to_string(f(port.0)) }
    }

    fn port_get_latency_range(&self, port: PortHandle, which: LatencyType) -> LatencyRange {
        let Some(f) = symbols().and_then(|s| s.port_get_latency_range) else {
            return LatencyRange::default();
        };
        let mode: u32 = match which {
            LatencyType::Capture => 0,
            LatencyType::Playback => 1,
        };
        let mut range = [0u32; 2];
        unsafe { f(port.0, mode, &mut range) };
        LatencyRange { min: range[0], max: range[1] }
    }

    fn port_by_name(&self, client: ClientHandle, name: &str) -> Option<PortHandle> {
        let f = symbols()?.port_by_name?;
        let cname = to_cstring(name);
        let ptr = unsafe { f(client.0, cname.as_ptr()) };
        if ptr.is_null() {
            None
        } else {
            Some(PortHandle(ptr))
        }
    }

    fn port_type(&self, port: PortHandle) -> Option<String> {
        let f = symbols()?.port_type?;
        unsafe { cstr_to_string(f(port.0)) }
    }

    fn get_ports(&self, client: ClientHandle, name_pattern: Option<&str>, type_pattern: Option<&str>, flags: u32) -> Vec<String> {
        let Some(f) = symbols().and_then(|s| s.get_ports) else {
            return Vec::new();
        };
        let Some(free) = symbols().and_then(|s| s.free) else {
            return Vec::new();
        };
        let name_c = name_pattern.map(to_cstring);
        let type_c = type_pattern.map(to_cstring);
        let name_ptr = name_c.as_ref().map(|c| c.as_ptr()).unwrap_or(std::ptr::null());
        let type_ptr = type_c.as_ref().map(|c| c.as_ptr()).unwrap_or(std::ptr::null());

        let raw = unsafe { f(client.0, name_ptr, type_ptr, flags as u64) };
        if raw.is_null() {
            return Vec::new();
        }
        let mut out = Vec::new();
        unsafe {
            let mut i = 0isize;
            loop {
                let entry = *raw.offset(i);
                if entry.is_null() {
                    break;
                }
                if let Some(s) = cstr_to_string(entry) {
                    out.push(s);
                }
                i += 1;
            }
            free(raw as *mut c_void);
        }
        out
    }

    fn connect(&self, client: ClientHandle, source: &str, destination: &str) -> bool {
        let Some(f) = symbols().and_then(|s| s.connect) else {
            return false;
        };
        let csrc = to_cstring(source);
        let cdst = to_cstring(destination);
        unsafe { f(client.0, csrc.as_ptr(), cdst.as_ptr()) == 0 }
    }

    fn port_get_buffer(&self, port: PortHandle, n_frames: u32) -> *mut f32 {
        let Some(f) = symbols().and_then(|s| s.port_get_buffer) else {
            return std::ptr::null_mut();
        };
        unsafe { f(port.0, n_frames) as *mut f32 }
    }

    fn transport_query(&self, client: ClientHandle) -> TransportState {
        let Some(f) = symbols().and_then(|s| s.transport_query) else {
            return TransportState::default();
        };
        // JackTransportStopped = 0, JackTransportRolling = 1, JackTransportStarting = 3
        match unsafe { f(client.0, std::ptr::null_mut()) } {
            1 => TransportState::Rolling,
            3 => TransportState::Starting,
            _ => TransportState::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_ok_false_without_a_library_on_the_search_path() {
        // In the test sandbox `libjack.so` is not installed, so every
        // fallback path (S7 in spec §8) should be exercised rather than
        // panicking.
        let backend = JackLibrary::new();
        assert!(!backend.is_ok());
        assert!(backend.client_open("test", false).is_none());
        assert!(!backend.activate(ClientHandle(std::ptr::null_mut())));
        assert_eq!(backend.get_ports(ClientHandle(std::ptr::null_mut()), None, None, 0), Vec::<String>::new());
    }
}
