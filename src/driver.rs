//! The driver façade: the operation surface a guest calls (open/close,
//! query channels/latency/rate/buffer, allocate buffers, start/stop,
//! control panel, future) — spec §4.F.
//!
//! This is the one place that touches the state machine, the channel set,
//! the rendezvous core and the backend symbol table together. The
//! realtime process callback trampoline lives here too, since it is the
//! thing that wires backend cycles into [`crate::rendezvous::RendezvousCore`].

use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::backend::{BackendOps, ClientHandle, LatencyType, PortDirection};
use crate::thread_creator;
use crate::channel::ChannelSet;
use crate::config::BridgeConfig;
use crate::connect::auto_connect_hardware;
use crate::convert::SampleFormat;
use crate::error::{DriverError, DriverResult};
use crate::rendezvous::{drain_outputs, stage_inputs, RendezvousCore};
use crate::state::{DriverState, Transition};
use crate::time::TimeInfo;
use crate::{MAX_BUFFER_FRAMES, MIN_BUFFER_FRAMES};

/// The unified per-cycle notification the guest receives, replacing
/// ASIO's two separate `bufferSwitch`/`bufferSwitchTimeInfo` callback
/// slots with one method parameterized by an optional [`TimeInfo`] — the
/// real dual-function-pointer arrangement belongs to the COM ABI this
/// core deliberately stays below (see spec §1 Deliberately out of scope).
pub trait GuestCallbacks: Send {
    /// Called once per rendezvous cycle (including the one priming
    /// cycle `start` runs inline). `buffer_index` selects which staging
    /// half the guest should read/write through the pointers handed back
    /// by [`Driver::create_buffers`]; `is_priming` is set only for that
    /// inline cycle; `time_info` is `Some` only when the guest opted into
    /// `time_info_mode`.
    fn on_cycle(&mut self, buffer_index: u8, is_priming: bool, time_info: Option<&TimeInfo>);

    /// Called once by `create_buffers`, right after it builds the
    /// `BufferInfo` pointer table, before any cycle can fire. Default is a
    /// no-op; callbacks that read or write staging directly (most do)
    /// override it to remember their pointers.
    fn on_buffers_ready(&mut self, buffers: &[BufferInfo]) {
        let _ = buffers;
    }

    /// Called at most once, when the backend shuts the client down out
    /// from under the driver. `reason` is whatever string the backend
    /// supplied.
    fn on_shutdown(&mut self, reason: &str) {
        let _ = reason;
    }
}

/// One entry in a `create_buffers` request: which channel, in which
/// direction, the guest wants activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRequest {
    /// `true` for an input (capture) channel, `false` for output.
    pub is_input: bool,
    /// 0-indexed channel number within its direction's capacity.
    pub channel: usize,
}

/// The buffer pointers handed back to the guest for one requested
/// channel, mirroring `ASIOBufferInfo`: one pointer per staging half.
#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    /// `true` for an input channel.
    pub is_input: bool,
    /// 0-indexed channel number.
    pub channel: usize,
    /// Pointer to staging half 0 and half 1, in that order. Valid for
    /// the lifetime of this `create_buffers`/`dispose_buffers` pairing.
    pub buffers: [*mut u8; 2],
}

// Safety: these are raw pointers into driver-owned staging memory handed
// to the guest for the lifetime of one CreateBuffers/DisposeBuffers
// pairing; the guest is expected to treat them the way ASIOBufferInfo
// pointers are always treated (accessed only during its own callback).
unsafe impl Send for BufferInfo {}

/// Reported channel capacities — spec §4.F `get_channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCounts {
    /// Configured input capacity.
    pub inputs: u32,
    /// Configured output capacity.
    pub outputs: u32,
}

/// Reported per-direction latency, in frames — spec §4.F `get_latencies`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Latencies {
    /// Maximum reported input latency across active input ports.
    pub input: u32,
    /// Maximum reported output latency across active output ports.
    pub output: u32,
}

/// The reported buffer-size envelope — spec §4.F `get_buffer_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizeRange {
    /// Smallest legal buffer size, in frames.
    pub min: u32,
    /// Largest legal buffer size, in frames.
    pub max: u32,
    /// The size the driver suggests if the guest has no preference.
    pub preferred: u32,
    /// Granularity: `0` means only `min == max == preferred` is legal
    /// (fixed buffer size); `-1` means any power of two in `[min, max]`.
    pub granularity: i32,
}

/// A single reported channel's static info — spec §4.F `get_channel_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Always 0 — this design has no channel grouping.
    pub group: i32,
    /// The sample format the driver advertises.
    pub sample_format: SampleFormat,
    /// Whether the guest activated this channel at `create_buffers`.
    pub active: bool,
    /// The backend port name registered for this channel.
    pub port_name: String,
}

/// The extension selectors `future` must recognize — spec §4.F `future`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureSelector {
    /// Enables time-code fields in the time-info record.
    EnableTimeCodeRead,
    /// Disables time-code fields.
    DisableTimeCodeRead,
    /// Queries whether the rich time-info callback form is supported.
    CanTimeInfo,
    /// Queries whether time-code reporting is supported.
    CanTimeCode,
    /// Any selector this driver deliberately declines (input monitor,
    /// transport control, gain/meter get/set, I/O format queries).
    Declined,
    /// Anything not named above.
    Unrecognized,
}

struct ClientName(String);

fn derive_client_name(config: &BridgeConfig) -> String {
    if let Some(name) = &config.client_name {
        return name.clone();
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "jackasio-bridge".to_string())
}

/// Everything the realtime process callback trampoline needs, shared
/// between the façade and the raw `extern "C"` entry point via a leaked
/// `Arc` (spec §9 "Global/singleton state" — the symbol table is
/// process-wide already; this mirrors that for the one active client).
struct ProcessState {
    rendezvous: RendezvousCore,
    channels: Arc<RwLock<ChannelSet>>,
    #[allow(dead_code)]
    format: SampleFormat,
    callbacks: Mutex<Option<Box<dyn GuestCallbacks>>>,
    time_info_mode: AtomicBool,
    time_code_enabled: AtomicBool,
    sample_rate: RwLock<f64>,
    backend: Arc<dyn BackendOps>,
    client: ClientHandle,
}

/// The driver façade. One instance per open guest driver (spec §3: "at
/// most one active at a time per process").
pub struct Driver {
    state: DriverState,
    config: BridgeConfig,
    backend: Arc<dyn BackendOps>,
    client: Option<ClientHandle>,
    client_name: Option<ClientName>,
    sample_rate: f64,
    buffer_frames: u32,
    format: SampleFormat,
    channels: Option<Arc<RwLock<ChannelSet>>>,
    process: Option<Arc<ProcessState>>,
    guest_thread: Option<JoinHandle<()>>,
    last_error: Option<String>,
}

/// Raw trampoline JACK invokes for every cycle. `arg` is the raw pointer
/// obtained from `Arc::into_raw` on a [`ProcessState`]. Must never
/// allocate, log, or panic across the FFI boundary — a caught panic at
/// worst emits silence for one cycle before `process = "abort"` takes
/// over (see the release profile).
extern "C" fn process_trampoline(n_frames: u32, arg: *mut c_void) -> i32 {
    // Safety: `arg` is the pointer this driver handed `set_process_callback`
    // in `open`, pointing at a `ProcessState` kept alive for exactly as
    // long as the callback is installed.
    let state = unsafe { &*(arg as *const ProcessState) };

    if !state.rendezvous.is_running() {
        return 0;
    }

    let channels = state.channels.read();
    let index = state.rendezvous.buffer_index();
    let now_ns = crate::time::stamp_now();

    // Safety: `jack_port_get_buffer` hands back a pointer into the
    // backend's own per-cycle buffer pool, valid for exactly `n_frames`
    // floats for the duration of this callback — standard JACK contract.
    let port_slice = |port: Option<crate::backend::PortHandle>| -> Option<&'static mut [f32]> {
        let port = port?;
        let ptr = state.backend.port_get_buffer(port, n_frames);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts_mut(ptr, n_frames as usize) })
        }
    };

    // Step 2 of spec §4.E: copy inputs in, applying the sample converter.
    let inputs: Vec<Option<&[f32]>> = channels.inputs.iter().map(|c| port_slice(c.port).map(|s| &*s)).collect();
    unsafe {
        stage_inputs(&channels, index, &inputs);
    }

    // Steps 3-5: stamp position/time, rendezvous with the guest thread.
    let returned_index = state.rendezvous.run_backend_cycle(n_frames, now_ns);

    // Step 6: copy outputs out, applying the reverse converter.
    let mut outputs: Vec<Option<&mut [f32]>> = channels.outputs.iter().map(|c| port_slice(c.port)).collect();
    unsafe {
        drain_outputs(&channels, returned_index, &mut outputs);
    }

    0
}

/// Raw trampoline for the buffer-size-change, sample-rate-change and
/// latency-change notifications. This driver has nothing useful to do in
/// response to any of the three beyond recording that they happened — the
/// authoritative values are re-queried the next time the façade asks for
/// them — so one trampoline serves all three registrations.
extern "C" fn size_change_trampoline(value: u32, _arg: *mut c_void) -> i32 {
    info!(value, "backend notified a buffer size, sample rate or latency change");
    0
}

/// Raw trampoline for the backend's info-shutdown notification. Forwards
/// to the installed [`GuestCallbacks::on_shutdown`], if any.
extern "C" fn shutdown_trampoline(reason: *const std::os::raw::c_char, arg: *mut c_void) {
    // Safety: see `process_trampoline`.
    let state = unsafe { &*(arg as *const ProcessState) };
    let reason = if reason.is_null() {
        "backend shut down".to_string()
    } else {
        unsafe { std::ffi::CStr::from_ptr(reason) }.to_string_lossy().into_owned()
    };
    warn!(reason = %reason, "backend client shut down");
    if let Some(callbacks) = state.callbacks.lock().as_mut() {
        callbacks.on_shutdown(&reason);
    }
}

/// Raw trampoline run on the guest-context thread spawned at `open`. Loops
/// calling [`RendezvousCore::guest_cycle`] until told to terminate.
fn guest_thread_loop(process: Arc<ProcessState>) {
    process.rendezvous.signal_guest_thread_started();
    loop {
        let time_info_mode = process.time_info_mode.load(Ordering::Acquire);
        let time_code_enabled = process.time_code_enabled.load(Ordering::Acquire);
        let backend = process.backend.clone();
        let client = process.client;
        let sample_rate = *process.sample_rate.read();
        let position = process.rendezvous.sample_position();
        let stamp = process.rendezvous.time_stamp();

        let context = process.rendezvous.guest_cycle(time_info_mode, || {
            TimeInfo::build(position, stamp, sample_rate, time_code_enabled, || backend.transport_query(client))
        });

        let Some(context) = context else {
            break;
        };

        if let Some(callbacks) = process.callbacks.lock().as_mut() {
            callbacks.on_cycle(context.buffer_index, context.is_priming, context.time_info.as_ref());
        }
        process.rendezvous.guest_cycle_done();
    }
}

impl Driver {
    /// A driver in the `Loaded` state, talking to `backend`.
    pub fn new(backend: Arc<dyn BackendOps>, config: BridgeConfig) -> Self {
        Driver {
            state: DriverState::Loaded,
            config,
            backend,
            client: None,
            client_name: None,
            sample_rate: 0.0,
            buffer_frames: 0,
            format: SampleFormat::Float32LE,
            channels: None,
            process: None,
            guest_thread: None,
            last_error: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    fn require(&self, op: Transition) -> DriverResult<()> {
        if self.state.can(op) {
            Ok(())
        } else {
            Err(DriverError::WrongState)
        }
    }

    /// `open`: Loaded → Initialized (spec §4.F).
    pub fn open(&mut self) -> DriverResult<()> {
        self.require(Transition::Open)?;

        if !self.backend.is_ok() {
            self.fail("backend library not available");
            return Err(DriverError::Unavailable("backend library not available".into()));
        }

        let name = derive_client_name(&self.config);
        let Some(client) = self.backend.client_open(&name, self.config.autostart_server) else {
            self.fail(format!("failed to open backend client {name:?}"));
            return Err(DriverError::Unavailable(format!("could not open client {name:?}")));
        };

        let sample_rate = self.backend.get_sample_rate(client).unwrap_or(48_000.0);
        let buffer_frames = self.backend.get_buffer_size(client).unwrap_or(self.config.preferred_buffersize);

        let mut channels = ChannelSet::allocate(
            self.config.number_of_inputs as usize,
            self.config.number_of_outputs as usize,
            self.format,
            buffer_frames as usize,
            &self.config.input_port_prefix,
            &self.config.output_port_prefix,
        );
        for ch in channels.inputs.iter_mut() {
            ch.port = self.backend.port_register(client, &ch.port_name, PortDirection::Input);
        }
        for ch in channels.outputs.iter_mut() {
            ch.port = self.backend.port_register(client, &ch.port_name, PortDirection::Output);
        }

        let channels = Arc::new(RwLock::new(channels));

        let process = Arc::new(ProcessState {
            rendezvous: RendezvousCore::new(),
            channels: channels.clone(),
            format: self.format,
            callbacks: Mutex::new(None),
            time_info_mode: AtomicBool::new(false),
            time_code_enabled: AtomicBool::new(false),
            sample_rate: RwLock::new(sample_rate),
            backend: self.backend.clone(),
            client,
        });

        // Spec §4.F: open installs every backend callback up front, not
        // just the process callback — create_buffers only ever swaps the
        // guest callback object inside the already-running `ProcessState`.
        let arg = Arc::as_ptr(&process) as *mut c_void;
        self.backend.set_process_callback(client, process_trampoline, arg);
        self.backend.set_buffer_size_callback(client, size_change_trampoline, arg);
        self.backend.set_sample_rate_callback(client, size_change_trampoline, arg);
        self.backend.set_latency_callback(client, size_change_trampoline, arg);
        self.backend.set_shutdown_callback(client, shutdown_trampoline, arg);
        self.backend.set_thread_creator(thread_creator::thread_creator_hook);

        let spawned = process.clone();
        let handle = std::thread::Builder::new()
            .name("jackasio-guest".into())
            .spawn(move || guest_thread_loop(spawned))
            .map_err(|_| DriverError::NoMemory)?;
        process.rendezvous.wait_guest_thread_started();

        self.client = Some(client);
        self.client_name = Some(ClientName(name));
        self.sample_rate = sample_rate;
        self.buffer_frames = buffer_frames;
        self.channels = Some(channels);
        self.process = Some(process);
        self.guest_thread = Some(handle);
        self.state = DriverState::Initialized;
        info!(sample_rate, buffer_frames, "backend client opened");
        Ok(())
    }

    /// Pure accessor: a stable name for this driver implementation.
    pub fn driver_name(&self) -> &'static str {
        "jackasio-bridge"
    }

    /// Pure accessor: the driver's own version, not the backend's.
    pub fn driver_version(&self) -> u32 {
        1
    }

    /// The backend client name in effect since `open` (auto-derived from
    /// the guest executable unless overridden by configuration).
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_ref().map(|n| n.0.as_str())
    }

    /// The last recorded error message, if any — spec §4.F
    /// `get_error_message`.
    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// `get_channels`: configured capacities.
    pub fn channels(&self) -> ChannelCounts {
        ChannelCounts {
            inputs: self.config.number_of_inputs,
            outputs: self.config.number_of_outputs,
        }
    }

    /// `get_latencies`: max reported backend latency per direction over
    /// active ports. Requires state ≥ Initialized.
    pub fn latencies(&self) -> DriverResult<Latencies> {
        if self.state == DriverState::Loaded {
            return Err(DriverError::WrongState);
        }
        let Some(channels) = &self.channels else {
            return Ok(Latencies::default());
        };
        let channels = channels.read();
        let input = channels
            .inputs
            .iter()
            .filter(|c| c.active)
            .filter_map(|c| c.port)
            .map(|p| self.backend.port_get_latency_range(p, LatencyType::Capture).max)
            .max()
            .unwrap_or(0);
        let output = channels
            .outputs
            .iter()
            .filter(|c| c.active)
            .filter_map(|c| c.port)
            .map(|p| self.backend.port_get_latency_range(p, LatencyType::Playback).max)
            .max()
            .unwrap_or(0);
        Ok(Latencies { input, output })
    }

    /// `get_buffer_size`.
    pub fn buffer_size_range(&self) -> BufferSizeRange {
        if self.config.fixed_buffersize {
            BufferSizeRange { min: self.buffer_frames, max: self.buffer_frames, preferred: self.buffer_frames, granularity: 0 }
        } else {
            BufferSizeRange { min: MIN_BUFFER_FRAMES, max: MAX_BUFFER_FRAMES, preferred: self.config.preferred_buffersize, granularity: -1 }
        }
    }

    /// `can_sample_rate`: succeeds iff `sr == sample_rate`.
    pub fn can_sample_rate(&self, sr: f64) -> bool {
        (sr - self.sample_rate).abs() < f64::EPSILON
    }

    /// `get_sample_rate`.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// `set_sample_rate`: a no-op when `sr` already matches (spec §9's
    /// resolution of the legacy disagreement), else `NoClock`.
    pub fn set_sample_rate(&mut self, sr: f64) -> DriverResult<()> {
        if self.can_sample_rate(sr) {
            Ok(())
        } else {
            Err(DriverError::NoClock { requested: sr, current: self.sample_rate })
        }
    }

    /// `get_clock_sources`: a single source, index 0, named "Internal".
    pub fn clock_sources(&self) -> &'static [&'static str] {
        &["Internal"]
    }

    /// `get_sample_position`: the last stamped position/timestamp.
    /// Requires state ≥ Prepared.
    pub fn sample_position(&self) -> DriverResult<(u64, u64)> {
        if matches!(self.state, DriverState::Loaded | DriverState::Initialized) {
            return Err(DriverError::WrongState);
        }
        let Some(process) = &self.process else {
            return Ok((0, 0));
        };
        Ok((process.rendezvous.sample_position(), process.rendezvous.time_stamp()))
    }

    /// `get_channel_info`.
    pub fn channel_info(&self, channel: usize, is_input: bool) -> DriverResult<ChannelInfo> {
        let Some(channels) = &self.channels else {
            return Err(DriverError::WrongState);
        };
        let channels = channels.read();
        let set = if is_input { &channels.inputs } else { &channels.outputs };
        let ch = set.get(channel).ok_or_else(|| DriverError::InvalidParameter(format!("channel {channel} out of range")))?;
        Ok(ChannelInfo { group: 0, sample_format: self.format, active: ch.active, port_name: ch.port_name.clone() })
    }

    /// `create_buffers`: Initialized → Prepared (spec §4.F).
    pub fn create_buffers(&mut self, requests: &[ChannelRequest], buffer_size: u32, callbacks: Box<dyn GuestCallbacks>) -> DriverResult<Vec<BufferInfo>> {
        self.require(Transition::CreateBuffers)?;
        let Some(client) = self.client else {
            return Err(DriverError::WrongState);
        };

        for req in requests {
            let capacity = if req.is_input { self.config.number_of_inputs } else { self.config.number_of_outputs };
            if req.channel as u32 >= capacity {
                return Err(DriverError::InvalidParameter(format!("channel {} out of range", req.channel)));
            }
        }

        let negotiated = if self.config.fixed_buffersize {
            if buffer_size != self.buffer_frames {
                return Err(DriverError::InvalidMode(format!("fixed buffer size, cannot change to {buffer_size}")));
            }
            buffer_size
        } else {
            if !buffer_size.is_power_of_two() || !(MIN_BUFFER_FRAMES..=MAX_BUFFER_FRAMES).contains(&buffer_size) {
                return Err(DriverError::InvalidMode(format!("{buffer_size} is not a power of two in [{MIN_BUFFER_FRAMES}, {MAX_BUFFER_FRAMES}]")));
            }
            if !self.backend.set_buffer_size(client, buffer_size) {
                return Err(DriverError::HardwareMalfunction(buffer_size));
            }
            buffer_size
        };
        self.buffer_frames = negotiated;

        let Some(channels_arc) = &self.channels else {
            return Err(DriverError::WrongState);
        };
        let Some(process) = &self.process else {
            return Err(DriverError::WrongState);
        };

        {
            let mut channels = channels_arc.write();
            channels.resize_staging(self.format, negotiated as usize);
            let active_in: Vec<usize> = requests.iter().filter(|r| r.is_input).map(|r| r.channel).collect();
            let active_out: Vec<usize> = requests.iter().filter(|r| !r.is_input).map(|r| r.channel).collect();
            channels.activate(&active_in, &active_out);
            if channels.active_input_count() + channels.active_output_count() == 0 {
                return Err(DriverError::InvalidParameter("at least one channel must be active".into()));
            }
        }

        *process.callbacks.lock() = Some(callbacks);

        if !self.backend.activate(client) {
            return Err(DriverError::Unavailable("backend refused activation".into()));
        }

        let buffer_infos = {
            let channels = channels_arc.read();
            if self.config.connect_to_hardware {
                auto_connect_hardware(self.backend.as_ref(), client, &channels.inputs, &channels.outputs);
            }
            requests
                .iter()
                .map(|req| {
                    let ch = if req.is_input { &channels.inputs[req.channel] } else { &channels.outputs[req.channel] };
                    BufferInfo { is_input: req.is_input, channel: req.channel, buffers: [ch.staging_ptr(0), ch.staging_ptr(1)] }
                })
                .collect()
        };

        if let Some(cb) = process.callbacks.lock().as_mut() {
            cb.on_buffers_ready(&buffer_infos);
        }

        self.state = DriverState::Prepared;
        Ok(buffer_infos)
    }

    /// `dispose_buffers`: Prepared → Initialized.
    pub fn dispose_buffers(&mut self) -> DriverResult<()> {
        // `stop` already deactivates the backend client on its way to
        // Prepared, so this only needs to cover the case where buffers are
        // disposed directly from Prepared without ever having started.
        let already_deactivated = self.state == DriverState::Running;
        if already_deactivated {
            self.stop()?;
        }
        if self.state != DriverState::Prepared {
            return Err(DriverError::WrongState);
        }
        if !already_deactivated {
            if let Some(client) = self.client {
                self.backend.deactivate(client);
            }
        }
        // The guest thread and rendezvous core live for the whole
        // Initialized..Running lifetime once `open` creates them (spec
        // §4.F); only the guest callback object is torn down here, since
        // it belongs to this particular create_buffers/dispose_buffers
        // pairing, not to the client connection itself.
        if let Some(process) = &self.process {
            *process.callbacks.lock() = None;
        }
        if let Some(channels) = &self.channels {
            channels.write().activate(&[], &[]);
        }
        self.state = DriverState::Initialized;
        Ok(())
    }

    /// `start`: Prepared → Running, with the inline priming cycle (spec
    /// §4.E "Priming").
    pub fn start(&mut self) -> DriverResult<()> {
        self.require(Transition::Start)?;
        let Some(process) = &self.process else {
            return Err(DriverError::WrongState);
        };

        if let Some(channels) = &self.channels {
            channels.write().clear_all_staging();
        }

        process.rendezvous.reset_for_start();
        process.rendezvous.run_priming_cycle(|ctx| {
            if let Some(callbacks) = process.callbacks.lock().as_mut() {
                callbacks.on_cycle(ctx.buffer_index, ctx.is_priming, None);
            }
        });

        self.state = DriverState::Running;
        Ok(())
    }

    /// `stop`: Running → Prepared. Deactivates the backend client so that,
    /// once this returns, no further backend cycles can occur.
    pub fn stop(&mut self) -> DriverResult<()> {
        if self.state != DriverState::Running {
            return Err(DriverError::WrongState);
        }
        if let Some(process) = &self.process {
            process.rendezvous.mark_stopped();
        }
        if let Some(client) = self.client {
            self.backend.deactivate(client);
        }
        self.state = DriverState::Prepared;
        Ok(())
    }

    /// `control_panel`: spawns a configured settings GUI; never fails
    /// the caller even if the spawn itself fails.
    pub fn control_panel(&self, command: Option<&str>) {
        let Some(command) = command else { return };
        match std::process::Command::new(command).spawn() {
            Ok(_) => {}
            Err(e) => warn!(command, error = %e, "control panel failed to launch"),
        }
    }

    /// `future`: the generic extension call.
    pub fn future(&mut self, selector: FutureSelector) -> DriverResult<()> {
        match selector {
            FutureSelector::EnableTimeCodeRead => {
                if let Some(p) = &self.process {
                    p.time_code_enabled.store(true, Ordering::Release);
                }
                Ok(())
            }
            FutureSelector::DisableTimeCodeRead => {
                if let Some(p) = &self.process {
                    p.time_code_enabled.store(false, Ordering::Release);
                }
                Ok(())
            }
            FutureSelector::CanTimeInfo | FutureSelector::CanTimeCode => Ok(()),
            FutureSelector::Declined => Err(DriverError::NotSupported("feature deliberately declined")),
            FutureSelector::Unrecognized => Err(DriverError::InvalidParameter("unrecognized future selector".into())),
        }
    }

    /// `output_ready`: always "not present" — this driver does not
    /// implement optimized output-ready signalling.
    pub fn output_ready(&self) -> DriverResult<()> {
        Err(DriverError::NotSupported("output-ready signalling"))
    }
}

impl Drop for Driver {
    /// Invariant 7's teardown cascade: cycles stopped → client
    /// deactivated → ports unregistered → semaphores destroyed → guest
    /// thread joined → client closed → symbol table left intact.
    fn drop(&mut self) {
        if self.state == DriverState::Running {
            let _ = self.stop();
        }
        if self.state == DriverState::Prepared {
            let _ = self.dispose_buffers();
        }
        if let Some(process) = self.process.take() {
            process.rendezvous.shutdown_guest_thread();
        }
        if let Some(handle) = self.guest_thread.take() {
            let _ = handle.join();
        }
        if let Some(client) = self.client.take() {
            if let Some(channels) = &self.channels {
                let channels = channels.read();
                for ch in channels.inputs.iter().chain(channels.outputs.iter()) {
                    if let Some(port) = ch.port {
                        self.backend.port_unregister(client, port);
                    }
                }
            }
            self.backend.client_close(client);
        }
    }
}
