//! Demo binary: opens a backend client, allocates buffers for a passthrough
//! loop, starts the rendezvous, and runs until interrupted.
//!
//! This mirrors what a real guest ASIO driver's COM shim would do when the
//! user presses "play" — minus the COM ABI itself, which this crate
//! deliberately stays below (see the library's top-level docs).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use jackasio_bridge::backend::jack_library::JackLibrary;
use jackasio_bridge::backend::BackendOps;
use jackasio_bridge::config::{BridgeConfig, DEFAULT_ENV_PREFIX};
use jackasio_bridge::convert::SampleFormat;
use jackasio_bridge::driver::{BufferInfo, ChannelRequest, Driver, GuestCallbacks};
use jackasio_bridge::time::TimeInfo;

#[derive(Parser, Debug)]
#[command(version, about = "Demo host for the JACK/ASIO rendezvous core", long_about = None)]
struct Cli {
    /// Number of input channels to activate (capped by configuration).
    #[arg(short, long, default_value_t = 2)]
    inputs: usize,

    /// Number of output channels to activate (capped by configuration).
    #[arg(short, long, default_value_t = 2)]
    outputs: usize,

    /// Backend client name (overrides configuration/auto-derivation).
    #[arg(long)]
    client_name: Option<String>,

    /// Requested buffer size in frames, when the backend allows negotiation.
    #[arg(long, default_value_t = 1024)]
    buffer_size: u32,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

/// A trivial [`GuestCallbacks`] implementation: copies each active input
/// channel's staging half straight into the matching output channel's
/// staging half, byte for byte. Good enough to prove the rendezvous moves
/// real audio without pretending to be a full guest runtime.
struct PassthroughCallbacks {
    format: SampleFormat,
    frames: usize,
    inputs: Vec<BufferInfo>,
    outputs: Vec<BufferInfo>,
    cycles: u64,
}

impl PassthroughCallbacks {
    fn new(format: SampleFormat, frames: usize) -> Self {
        PassthroughCallbacks { format, frames, inputs: Vec::new(), outputs: Vec::new(), cycles: 0 }
    }
}

impl GuestCallbacks for PassthroughCallbacks {
    fn on_buffers_ready(&mut self, buffers: &[BufferInfo]) {
        self.inputs = buffers.iter().copied().filter(|b| b.is_input).collect();
        self.outputs = buffers.iter().copied().filter(|b| !b.is_input).collect();
    }

    fn on_cycle(&mut self, buffer_index: u8, is_priming: bool, _time_info: Option<&TimeInfo>) {
        if is_priming {
            return;
        }
        self.cycles += 1;
        let half = (buffer_index & 1) as usize;
        let bytes_per_channel = self.frames * self.format.sample_bytes();
        for (input, output) in self.inputs.iter().zip(self.outputs.iter()) {
            let src = input.buffers[half];
            let dst = output.buffers[half];
            if src.is_null() || dst.is_null() {
                continue;
            }
            // Safety: these pointers are the staging halves `create_buffers`
            // handed back for this exact buffer_index; the rendezvous
            // protocol guarantees this half belongs to the guest thread for
            // the duration of this callback.
            unsafe {
                std::ptr::copy_nonoverlapping(src, dst, bytes_per_channel);
            }
        }
        if self.cycles % 1000 == 0 {
            debug!(cycles = self.cycles, "passthrough cycles processed");
        }
    }

    fn on_shutdown(&mut self, reason: &str) {
        warn!(reason, "backend shut down mid-stream");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    jackasio_bridge::logging::init(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO });

    let mut config = BridgeConfig::resolve_standard(DEFAULT_ENV_PREFIX);
    if cli.client_name.is_some() {
        config.client_name = cli.client_name.clone();
    }
    info!(?config, "resolved configuration");

    let backend: Arc<dyn BackendOps> = Arc::new(JackLibrary::new());
    let mut driver = Driver::new(backend, config.clone());

    driver.open()?;
    info!(client_name = driver.client_name(), sample_rate = driver.sample_rate(), "backend client opened");

    let n_in = cli.inputs.min(config.number_of_inputs as usize);
    let n_out = cli.outputs.min(config.number_of_outputs as usize);
    let requests: Vec<ChannelRequest> = (0..n_in)
        .map(|c| ChannelRequest { is_input: true, channel: c })
        .chain((0..n_out).map(|c| ChannelRequest { is_input: false, channel: c }))
        .collect();

    let format = SampleFormat::Float32LE;
    let callbacks = PassthroughCallbacks::new(format, cli.buffer_size as usize);
    driver.create_buffers(&requests, cli.buffer_size, Box::new(callbacks))?;

    driver.start()?;
    info!("rendezvous running, press Ctrl-C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    driver.stop()?;
    driver.dispose_buffers()?;
    Ok(())
}
