//! End-to-end scenarios and property-style invariants driving [`Driver`]
//! against a hand-rolled fake backend (no real audio server needed).
//!
//! `BackendOps` is a plain trait, so unlike the crate's own unit tests
//! (which substitute `mockall`'s generated mock, only available inside the
//! crate's own `cfg(test)` build) this integration suite implements it
//! directly. The fake owns real `f32` sample buffers per port and, for the
//! streaming scenarios, calls the installed process callback itself to
//! stand in for JACK's realtime thread.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::Arc;
use std::sync::Mutex;

use jackasio_bridge::backend::{
    BackendOps, ClientHandle, LatencyRange, LatencyType, PortDirection, PortHandle, RawProcessCallback,
    RawShutdownCallback, RawSizeCallback, RawThreadCreator, TransportState,
};
use jackasio_bridge::config::BridgeConfig;
use jackasio_bridge::driver::{BufferInfo, ChannelRequest, Driver, GuestCallbacks};
use jackasio_bridge::error::DriverError;
use jackasio_bridge::state::DriverState;
use jackasio_bridge::time::TimeInfo;

struct Inner {
    is_ok: bool,
    opened: bool,
    sample_rate: f64,
    buffer_size: u32,
    next_port_id: usize,
    port_buffers: HashMap<usize, Vec<f32>>,
    port_names: HashMap<usize, String>,
    process_cb: Option<(RawProcessCallback, usize)>,
    connections: Vec<(String, String)>,
}

/// A fake backend standing in for a JACK server, driven directly by tests
/// instead of a real realtime thread.
struct StubBackend {
    inner: Mutex<Inner>,
}

impl StubBackend {
    fn new(sample_rate: f64, buffer_size: u32) -> Arc<Self> {
        Arc::new(StubBackend {
            inner: Mutex::new(Inner {
                is_ok: true,
                opened: false,
                sample_rate,
                buffer_size,
                next_port_id: 0,
                port_buffers: HashMap::new(),
                port_names: HashMap::new(),
                process_cb: None,
                connections: Vec::new(),
            }),
        })
    }

    fn unavailable() -> Arc<Self> {
        let backend = StubBackend::new(48_000.0, 1024);
        backend.inner.lock().unwrap().is_ok = false;
        backend
    }

    /// Simulates one JACK process cycle by invoking the installed
    /// callback directly, exactly as the realtime thread would.
    fn fire_process(&self, n_frames: u32) {
        let (cb, arg) = {
            let inner = self.inner.lock().unwrap();
            inner.process_cb.expect("process callback must be installed before firing a cycle")
        };
        unsafe {
            cb(n_frames, arg as *mut c_void);
        }
    }

    fn port_samples(&self, port: PortHandle) -> Vec<f32> {
        let inner = self.inner.lock().unwrap();
        inner.port_buffers[&(port.0 as usize)].clone()
    }

    fn set_port_samples(&self, port: PortHandle, samples: &[f32]) {
        let mut inner = self.inner.lock().unwrap();
        inner.port_buffers.get_mut(&(port.0 as usize)).unwrap().copy_from_slice(samples);
    }
}

impl BackendOps for StubBackend {
    fn is_ok(&self) -> bool {
        self.inner.lock().unwrap().is_ok
    }

    fn client_open(&self, _name: &str, _autostart: bool) -> Option<ClientHandle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.is_ok {
            return None;
        }
        inner.opened = true;
        Some(ClientHandle(1 as *mut c_void))
    }

    fn client_close(&self, _client: ClientHandle) -> bool {
        self.inner.lock().unwrap().opened = false;
        true
    }

    fn get_client_name(&self, _client: ClientHandle) -> Option<String> {
        Some("stub".to_string())
    }

    fn activate(&self, _client: ClientHandle) -> bool {
        true
    }

    fn deactivate(&self, _client: ClientHandle) -> bool {
        true
    }

    fn is_realtime(&self, _client: ClientHandle) -> bool {
        false
    }

    fn get_sample_rate(&self, _client: ClientHandle) -> Option<f64> {
        Some(self.inner.lock().unwrap().sample_rate)
    }

    fn get_buffer_size(&self, _client: ClientHandle) -> Option<u32> {
        Some(self.inner.lock().unwrap().buffer_size)
    }

    fn set_buffer_size(&self, _client: ClientHandle, frames: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.buffer_size = frames;
        for buf in inner.port_buffers.values_mut() {
            buf.resize(frames as usize, 0.0);
        }
        true
    }

    fn set_process_callback(&self, _client: ClientHandle, cb: RawProcessCallback, arg: *mut c_void) -> bool {
        self.inner.lock().unwrap().process_cb = Some((cb, arg as usize));
        true
    }

    fn set_buffer_size_callback(&self, _client: ClientHandle, _cb: RawSizeCallback, _arg: *mut c_void) -> bool {
        true
    }

    fn set_sample_rate_callback(&self, _client: ClientHandle, _cb: RawSizeCallback, _arg: *mut c_void) -> bool {
        true
    }

    fn set_latency_callback(&self, _client: ClientHandle, _cb: RawSizeCallback, _arg: *mut c_void) -> bool {
        true
    }

    fn set_shutdown_callback(&self, _client: ClientHandle, _cb: RawShutdownCallback, _arg: *mut c_void) {}

    fn set_thread_creator(&self, _creator: RawThreadCreator) -> bool {
        true
    }

    fn port_register(&self, _client: ClientHandle, name: &str, _direction: PortDirection) -> Option<PortHandle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_port_id;
        inner.next_port_id += 1;
        let frames = inner.buffer_size as usize;
        inner.port_buffers.insert(id, vec![0.0; frames]);
        inner.port_names.insert(id, name.to_string());
        Some(PortHandle(id as *mut c_void))
    }

    fn port_unregister(&self, _client: ClientHandle, port: PortHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.port_buffers.remove(&(port.0 as usize));
        inner.port_names.remove(&(port.0 as usize));
        true
    }

    fn port_name(&self, port: PortHandle) -> Option<String> {
        self.inner.lock().unwrap().port_names.get(&(port.0 as usize)).cloned()
    }

    fn port_get_latency_range(&self, _port: PortHandle, _which: LatencyType) -> LatencyRange {
        LatencyRange { min: 0, max: 64 }
    }

    fn port_by_name(&self, _client: ClientHandle, name: &str) -> Option<PortHandle> {
        let inner = self.inner.lock().unwrap();
        inner.port_names.iter().find(|(_, n)| n.as_str() == name).map(|(&id, _)| PortHandle(id as *mut c_void))
    }

    fn port_type(&self, _port: PortHandle) -> Option<String> {
        Some("32 bit float mono audio".to_string())
    }

    fn port_get_buffer(&self, port: PortHandle, n_frames: u32) -> *mut f32 {
        let mut inner = self.inner.lock().unwrap();
        let Some(buf) = inner.port_buffers.get_mut(&(port.0 as usize)) else {
            return std::ptr::null_mut();
        };
        buf.resize(n_frames as usize, 0.0);
        buf.as_mut_ptr()
    }

    fn get_ports(&self, _client: ClientHandle, _name_pattern: Option<&str>, _type_pattern: Option<&str>, _flags: u32) -> Vec<String> {
        Vec::new()
    }

    fn connect(&self, _client: ClientHandle, source: &str, destination: &str) -> bool {
        self.inner.lock().unwrap().connections.push((source.to_string(), destination.to_string()));
        true
    }

    fn transport_query(&self, _client: ClientHandle) -> TransportState {
        TransportState::Stopped
    }
}

fn config(n_in: u32, n_out: u32, fixed: bool, preferred: u32) -> BridgeConfig {
    let mut cfg = BridgeConfig::default();
    cfg.number_of_inputs = n_in;
    cfg.number_of_outputs = n_out;
    cfg.fixed_buffersize = fixed;
    cfg.preferred_buffersize = preferred;
    cfg.connect_to_hardware = false;
    cfg.client_name = Some("scenario-test".to_string());
    cfg
}

struct RecordingCallbacks {
    seen: Arc<Mutex<Vec<(u8, bool)>>>,
}

impl GuestCallbacks for RecordingCallbacks {
    fn on_cycle(&mut self, buffer_index: u8, is_priming: bool, _time_info: Option<&TimeInfo>) {
        self.seen.lock().unwrap().push((buffer_index, is_priming));
    }
}

struct NoopCallbacks;
impl GuestCallbacks for NoopCallbacks {
    fn on_cycle(&mut self, _buffer_index: u8, _is_priming: bool, _time_info: Option<&TimeInfo>) {}
}

/// S1: Open-close cycle.
#[test]
fn s1_open_close_cycle_reports_configured_capacities() {
    let backend = StubBackend::new(48_000.0, 1024);
    let mut driver = Driver::new(backend, config(2, 2, true, 1024));

    driver.open().expect("open should succeed");
    let channels = driver.channels();
    assert_eq!((channels.inputs, channels.outputs), (2, 2));

    let range = driver.buffer_size_range();
    assert_eq!((range.min, range.max, range.preferred, range.granularity), (1024, 1024, 1024, 0));
    assert_eq!(driver.sample_rate(), 48_000.0);

    drop(driver);
    // No explicit thread-count assertion is possible from here, but
    // `Drop` joining the guest thread (see src/driver.rs) means this
    // returning at all, rather than hanging, is the test.
}

/// S2: Start-stop with priming — the expected (buffer_index, is_priming)
/// sequence across the inline priming cycle plus four backend cycles.
#[test]
fn s2_start_stop_produces_the_documented_priming_sequence() {
    let backend = StubBackend::new(48_000.0, 1024);
    let mut driver = Driver::new(backend.clone(), config(2, 2, false, 1024));
    driver.open().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let requests = vec![
        ChannelRequest { is_input: true, channel: 0 },
        ChannelRequest { is_input: true, channel: 1 },
        ChannelRequest { is_input: false, channel: 0 },
        ChannelRequest { is_input: false, channel: 1 },
    ];
    driver.create_buffers(&requests, 1024, Box::new(RecordingCallbacks { seen: seen.clone() })).unwrap();

    driver.start().unwrap();
    for _ in 0..4 {
        backend.fire_process(1024);
    }
    driver.stop().unwrap();

    let recorded = seen.lock().unwrap().clone();
    assert_eq!(recorded, vec![(0, true), (1, false), (0, false), (1, false), (0, false)]);
}

/// S3: sample-position accounting — after 10 cycles of 512 frames each,
/// position must read 5120.
#[test]
fn s3_sample_position_accumulates_frames_per_cycle() {
    let backend = StubBackend::new(48_000.0, 512);
    let mut driver = Driver::new(backend.clone(), config(1, 1, false, 512));
    driver.open().unwrap();
    let requests = vec![ChannelRequest { is_input: true, channel: 0 }, ChannelRequest { is_input: false, channel: 0 }];
    driver.create_buffers(&requests, 512, Box::new(NoopCallbacks)).unwrap();
    driver.start().unwrap();

    for _ in 0..10 {
        backend.fire_process(512);
    }

    let (position, _stamp) = driver.sample_position().unwrap();
    assert_eq!(position, 5120);
}

/// S4: illegal transitions report WrongState without changing behavior.
#[test]
fn s4_illegal_transitions_report_wrong_state() {
    let backend = StubBackend::new(48_000.0, 1024);
    let mut driver = Driver::new(backend, config(2, 2, false, 1024));

    assert_eq!(driver.create_buffers(&[], 1024, Box::new(NoopCallbacks)).unwrap_err(), DriverError::WrongState);
    assert_eq!(driver.start().unwrap_err(), DriverError::WrongState);
    assert_eq!(driver.stop().unwrap_err(), DriverError::WrongState);

    driver.open().unwrap();
    let requests = vec![ChannelRequest { is_input: true, channel: 0 }, ChannelRequest { is_input: false, channel: 0 }];
    driver.create_buffers(&requests, 1024, Box::new(NoopCallbacks)).unwrap();
    driver.start().unwrap();
    assert_eq!(driver.state(), DriverState::Running);
    assert_eq!(driver.create_buffers(&requests, 1024, Box::new(NoopCallbacks)).unwrap_err(), DriverError::WrongState);
}

/// S5: buffer-size negotiation — legal power-of-two sizes succeed and are
/// reflected back; illegal sizes fail with InvalidMode.
#[test]
fn s5_buffer_size_negotiation_accepts_power_of_two_only() {
    let backend = StubBackend::new(48_000.0, 1024);
    let mut driver = Driver::new(backend, config(2, 2, false, 1024));
    driver.open().unwrap();

    let requests = vec![ChannelRequest { is_input: true, channel: 0 }, ChannelRequest { is_input: false, channel: 0 }];
    driver.create_buffers(&requests, 512, Box::new(NoopCallbacks)).unwrap();
    let range = driver.buffer_size_range();
    assert_eq!((range.min, range.max, range.preferred, range.granularity), (16, 8192, 1024, -1));
    driver.dispose_buffers().unwrap();

    assert!(matches!(driver.create_buffers(&requests, 1000, Box::new(NoopCallbacks)), Err(DriverError::InvalidMode(_))));
    assert!(matches!(driver.create_buffers(&requests, 32768, Box::new(NoopCallbacks)), Err(DriverError::InvalidMode(_))));
}

/// S6: channel mapping — only the requested channels are marked active.
#[test]
fn s6_channel_mapping_activates_exactly_the_requested_channels() {
    let backend = StubBackend::new(48_000.0, 1024);
    let mut driver = Driver::new(backend, config(2, 2, true, 1024));
    driver.open().unwrap();

    let requests = vec![
        ChannelRequest { is_input: true, channel: 0 },
        ChannelRequest { is_input: false, channel: 0 },
        ChannelRequest { is_input: false, channel: 1 },
    ];
    driver.create_buffers(&requests, 1024, Box::new(NoopCallbacks)).unwrap();

    assert!(driver.channel_info(0, true).unwrap().active);
    assert!(!driver.channel_info(1, true).unwrap().active);
    assert!(driver.channel_info(0, false).unwrap().active);
    assert!(driver.channel_info(1, false).unwrap().active);
}

/// S7: a missing backend library fails Open cleanly and leaves the driver
/// in Loaded, reporting WrongState for every other call.
#[test]
fn s7_backend_absent_fails_open_without_crashing() {
    let backend = StubBackend::unavailable();
    let mut driver = Driver::new(backend, config(2, 2, true, 1024));

    assert!(matches!(driver.open(), Err(DriverError::Unavailable(_))));
    assert_eq!(driver.state(), DriverState::Loaded);
    assert_eq!(driver.start().unwrap_err(), DriverError::WrongState);
    assert_eq!(driver.stop().unwrap_err(), DriverError::WrongState);
}

/// Invariant 2/3: double-buffer disjointness and no tearing — samples the
/// backend stages into a cycle are exactly the samples a passthrough guest
/// callback reads back out the far side, once the pipeline has settled.
#[test]
fn invariant_no_tearing_across_the_rendezvous() {
    let backend = StubBackend::new(48_000.0, 64);
    let mut driver = Driver::new(backend.clone(), config(1, 1, false, 64));
    driver.open().unwrap();

    let requests = vec![ChannelRequest { is_input: true, channel: 0 }, ChannelRequest { is_input: false, channel: 0 }];

    struct Passthrough {
        buffers: Vec<BufferInfo>,
    }
    impl GuestCallbacks for Passthrough {
        fn on_buffers_ready(&mut self, buffers: &[BufferInfo]) {
            self.buffers = buffers.to_vec();
        }
        fn on_cycle(&mut self, buffer_index: u8, is_priming: bool, _time_info: Option<&TimeInfo>) {
            if is_priming {
                return;
            }
            let half = (buffer_index & 1) as usize;
            let input = self.buffers.iter().find(|b| b.is_input).unwrap();
            let output = self.buffers.iter().find(|b| !b.is_input).unwrap();
            unsafe {
                std::ptr::copy_nonoverlapping(input.buffers[half], output.buffers[half], 64 * 4);
            }
        }
    }

    driver.create_buffers(&requests, 64, Box::new(Passthrough { buffers: Vec::new() })).unwrap();

    driver.start().unwrap();

    // Find the actual backend ports via their registered names so we can
    // push a known waveform in and read it back out.
    let in_port = backend.inner.lock().unwrap().port_names.iter().find(|(_, n)| n.as_str() == "in_1").map(|(&id, _)| PortHandle(id as *mut c_void)).unwrap();
    let out_port = backend.inner.lock().unwrap().port_names.iter().find(|(_, n)| n.as_str() == "out_1").map(|(&id, _)| PortHandle(id as *mut c_void)).unwrap();

    // The rendezvous is a strict handshake, not a pipeline: within a
    // single backend cycle, input is staged, the guest runs synchronously
    // against that very half, and output is drained from the same half —
    // so one cycle is enough to see a value make the round trip.
    let wave: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0) - 0.5).collect();
    backend.set_port_samples(in_port, &wave);
    backend.fire_process(64);

    let produced = backend.port_samples(out_port);
    for (expected, actual) in wave.iter().zip(produced.iter()) {
        assert!((expected - actual).abs() < 1e-6, "expected {expected}, got {actual}");
    }

    driver.stop().unwrap();
}
