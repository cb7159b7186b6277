//! The backend symbol table: a null-safe function table standing in for
//! the JACK client library.
//!
//! [`BackendOps`] is the seam the rest of the crate talks through. The
//! production implementation ([`jack_library::JackLibrary`]) resolves every
//! entry by `dlopen`/`dlsym` against `libjack.so` lazily and process-wide;
//! an absent symbol degrades the corresponding method to the documented
//! safe fallback (`None`/`false`/`0`) rather than panicking or failing to
//! link. Tests substitute a `mockall`-generated mock so the rest of the
//! suite never needs a running JACK server.

pub mod jack_library;

use std::os::raw::c_void;

/// Opaque handle to a `jack_client_t*`. Copy, never dereferenced outside
/// [`jack_library`] — every other module treats it as an inert token to
/// hand back to `BackendOps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandle(pub(crate) *mut c_void);

/// Opaque handle to a `jack_port_t*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortHandle(pub(crate) *mut c_void);

// Raw pointers aren't `Send` by default. These handles only ever cross
// threads as inert tokens passed back into `BackendOps` methods — never
// dereferenced by driver/channel/rendezvous code — so moving them between
// the control-plane thread and the realtime thread is sound.
unsafe impl Send for ClientHandle {}
unsafe impl Send for PortHandle {}

/// Which direction a port carries audio in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// A capture/input port — the driver reads samples from it.
    Input,
    /// A playback/output port — the driver writes samples to it.
    Output,
}

/// JACK latency-range query mode, mirroring `jack_latency_callback_mode_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyType {
    /// Capture latency.
    Capture,
    /// Playback latency.
    Playback,
}

/// A `[min, max]` latency range in frames, as returned by
/// `jack_port_get_latency_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyRange {
    /// Minimum latency, in frames.
    pub min: u32,
    /// Maximum latency, in frames.
    pub max: u32,
}

/// Raw bit flags matching JACK's `JackPortFlags` (`jack/types.h`). Kept as
/// plain `u32` constants rather than pulling in a bitflags dependency —
/// there are exactly four of them and they're only ever OR'd together.
pub mod port_flags {
    /// `JackPortIsInput`
    pub const IS_INPUT: u32 = 0x1;
    /// `JackPortIsOutput`
    pub const IS_OUTPUT: u32 = 0x2;
    /// `JackPortIsPhysical`
    pub const IS_PHYSICAL: u32 = 0x4;
    /// `JackPortIsTerminal`
    pub const IS_TERMINAL: u32 = 0x10;
}

/// JACK transport state, as returned by `jack_transport_query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Transport is stopped.
    #[default]
    Stopped,
    /// Transport is rolling.
    Rolling,
    /// Transport is looping or otherwise starting.
    Starting,
}

/// The realtime process callback signature JACK invokes, as a raw C
/// function pointer — the driver registers a single trampoline that
/// forwards into [`crate::rendezvous::RendezvousCore`].
pub type RawProcessCallback = unsafe extern "C" fn(n_frames: u32, arg: *mut c_void) -> i32;

/// The buffer-size-change / sample-rate-change notification signature.
pub type RawSizeCallback = unsafe extern "C" fn(value: u32, arg: *mut c_void) -> i32;

/// The shutdown notification signature (`JackInfoShutdownCallback`-style:
/// carries a reason string).
pub type RawShutdownCallback = unsafe extern "C" fn(reason: *const std::os::raw::c_char, arg: *mut c_void);

/// The thread-creator hook signature JACK calls when it needs a realtime
/// thread (see [`crate::thread_creator`]).
pub type RawThreadCreator = unsafe extern "C" fn(
    thread_id: *mut u64,
    realtime_priority: i32,
    realtime: i32,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> i32;

/// The null-safe operation surface over the JACK client library.
///
/// Every method here either succeeds, or returns the documented fallback
/// when the corresponding symbol wasn't resolvable (or the call failed at
/// runtime) — never panics. This is the full set named in spec §6.
#[cfg_attr(test, mockall::automock)]
pub trait BackendOps: Send + Sync {
    /// Whether the library loaded and at least `jack_client_open` resolved.
    /// Mirrors `jackbridge_is_ok()`.
    fn is_ok(&self) -> bool;

    /// Opens (or creates) a client with the given name.
    fn client_open(&self, name: &str, autostart: bool) -> Option<ClientHandle>;
    /// Closes a previously opened client.
    fn client_close(&self, client: ClientHandle) -> bool;
    /// The server-assigned client name (may differ from the requested one).
    fn get_client_name(&self, client: ClientHandle) -> Option<String>;

    /// Activates the client — after this, port connections are live and
    /// the process callback may be invoked.
    fn activate(&self, client: ClientHandle) -> bool;
    /// Deactivates the client — guarantees no further process callbacks.
    fn deactivate(&self, client: ClientHandle) -> bool;
    /// Whether the client is running with realtime scheduling.
    fn is_realtime(&self, client: ClientHandle) -> bool;

    /// The server's current sample rate.
    fn get_sample_rate(&self, client: ClientHandle) -> Option<f64>;
    /// The server's current buffer size, in frames.
    fn get_buffer_size(&self, client: ClientHandle) -> Option<u32>;
    /// Requests a buffer size change. `false` if the server refused.
    fn set_buffer_size(&self, client: ClientHandle, frames: u32) -> bool;

    /// Installs the process callback.
    fn set_process_callback(&self, client: ClientHandle, cb: RawProcessCallback, arg: *mut c_void) -> bool;
    /// Installs the buffer-size-change notification.
    fn set_buffer_size_callback(&self, client: ClientHandle, cb: RawSizeCallback, arg: *mut c_void) -> bool;
    /// Installs the sample-rate-change notification.
    fn set_sample_rate_callback(&self, client: ClientHandle, cb: RawSizeCallback, arg: *mut c_void) -> bool;
    /// Installs the latency-change notification.
    fn set_latency_callback(&self, client: ClientHandle, cb: RawSizeCallback, arg: *mut c_void) -> bool;
    /// Installs the info-shutdown notification.
    fn set_shutdown_callback(&self, client: ClientHandle, cb: RawShutdownCallback, arg: *mut c_void);
    /// Installs a process-wide thread-creator hook (see
    /// [`crate::thread_creator`]).
    fn set_thread_creator(&self, creator: RawThreadCreator) -> bool;

    /// Registers a port. `None` on failure (name collision, bad client, …).
    fn port_register(&self, client: ClientHandle, name: &str, direction: PortDirection) -> Option<PortHandle>;
    /// Unregisters a previously registered port.
    fn port_unregister(&self, client: ClientHandle, port: PortHandle) -> bool;
    /// The port's full name (`client:short_name`).
    fn port_name(&self, port: PortHandle) -> Option<String>;
    /// The latency range JACK reports for a port in the given direction.
    fn port_get_latency_range(&self, port: PortHandle, which: LatencyType) -> LatencyRange;
    /// Looks a port up by its full name.
    fn port_by_name(&self, client: ClientHandle, name: &str) -> Option<PortHandle>;
    /// The port's JACK type string (`"32 bit float mono audio"` for audio).
    fn port_type(&self, port: PortHandle) -> Option<String>;
    /// Raw pointer to this cycle's `n_frames`-float audio buffer for
    /// `port`. Valid only for the duration of the process callback that
    /// received `n_frames`; null if the symbol is unavailable or the
    /// call fails. Callers on the realtime thread only.
    fn port_get_buffer(&self, port: PortHandle, n_frames: u32) -> *mut f32;

    /// Lists ports matching the given name/type patterns and flags.
    fn get_ports(&self, client: ClientHandle, name_pattern: Option<&str>, type_pattern: Option<&str>, flags: u32) -> Vec<String>;
    /// Connects two ports by full name.
    fn connect(&self, client: ClientHandle, source: &str, destination: &str) -> bool;

    /// Queries the transport's current state.
    fn transport_query(&self, client: ClientHandle) -> TransportState;
}
