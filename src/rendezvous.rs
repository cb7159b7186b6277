//! The dual-thread realtime handoff: backend cycle callback ↔ guest cycle
//! thread. This is the hardest part of the design (spec §4.E, §5) — get
//! this wrong and either thread can race the other's half of a channel's
//! staging, or block somewhere it must not.
//!
//! The synchronization primitive is a hand-rolled counting semaphore over
//! `Mutex<u32>` + `Condvar`, not `tokio::sync::Semaphore`: there is no
//! executor here, the hot path must not allocate, and a condvar wait is
//! the only blocking operation either realtime thread is allowed to
//! perform.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::channel::ChannelSet;
use crate::time::TimeInfo;

/// A counting semaphore built from `Mutex<u32>` + `Condvar`. No allocation
/// on `post`/`wait` once constructed — the two operations this design
/// needs on its hot path.
pub struct Semaphore {
    count: Mutex<u32>,
    cvar: Condvar,
}

impl Semaphore {
    /// A semaphore starting at `initial`.
    pub fn new(initial: u32) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            cvar: Condvar::new(),
        }
    }

    /// Increments the count and wakes one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.cvar.notify_one();
    }

    /// Blocks until the count is positive, then decrements it. There is
    /// no timeout: spec §4.E is explicit that a misbehaving guest callback
    /// is not the rendezvous's problem to recover from.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == 0 {
            count = self.cvar.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        *count -= 1;
    }
}

/// What the guest callback is told about the cycle it is about to render.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    /// Which half of every channel's staging the guest should touch this
    /// cycle.
    pub buffer_index: u8,
    /// Set only for the one inline priming cycle `start` runs before any
    /// real backend cycle.
    pub is_priming: bool,
    /// Present when `time_info_mode` is set; `None` means the guest's
    /// plain callback form applies.
    pub time_info: Option<TimeInfo>,
}

/// The shared state two realtime threads rendezvous over: the paired
/// semaphores, the buffer-index selector, the position/timestamp counters
/// and the termination flag. Exactly one instance exists per `Running`
/// driver (constructed at `create_buffers`, destroyed at `dispose_buffers`
/// or drop).
pub struct RendezvousCore {
    sem1: Semaphore,
    sem2: Semaphore,
    buffer_index: AtomicU8,
    sample_position: AtomicU64,
    time_stamp: AtomicU64,
    terminate: AtomicBool,
    guest_thread_started: Semaphore,
    guest_thread_stopped: Semaphore,
    running: AtomicBool,
}

impl RendezvousCore {
    /// A fresh core with both semaphores at zero, `buffer_index` at 0, and
    /// `running` false (the guest thread parks on `sem1` until `start`).
    pub fn new() -> Self {
        RendezvousCore {
            sem1: Semaphore::new(0),
            sem2: Semaphore::new(0),
            buffer_index: AtomicU8::new(0),
            sample_position: AtomicU64::new(0),
            time_stamp: AtomicU64::new(0),
            terminate: AtomicBool::new(false),
            guest_thread_started: Semaphore::new(0),
            guest_thread_stopped: Semaphore::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// The half of staging currently assigned to the cycle in flight.
    pub fn buffer_index(&self) -> u8 {
        self.buffer_index.load(Ordering::Acquire)
    }

    /// Frames delivered since the last `start_cycles` (invariant 6).
    pub fn sample_position(&self) -> u64 {
        self.sample_position.load(Ordering::Acquire)
    }

    /// Wall-clock nanoseconds stamped at the start of the current cycle.
    pub fn time_stamp(&self) -> u64 {
        self.time_stamp.load(Ordering::Acquire)
    }

    /// Whether cycles are being serviced (backend client activated and
    /// `start` has run).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resets `sample_position` to zero and `buffer_index` to 0, then
    /// marks the core running. Called by `start`, before priming (spec
    /// §4.E "Priming").
    pub fn reset_for_start(&self) {
        self.sample_position.store(0, Ordering::Release);
        self.buffer_index.store(0, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Marks the core stopped: subsequent backend cycles must emit
    /// silence rather than rendezvous (spec §4.F `stop`).
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// **Backend realtime thread.** Runs one cycle's rendezvous: stamps
    /// position/time, posts `sem1`, waits on `sem2`, flips `buffer_index`.
    /// The caller (the process callback trampoline) is responsible for
    /// steps 2 and 6 of spec §4.E — converting samples in and out of
    /// staging before/after calling this — since those need access to the
    /// per-channel staging this type doesn't own.
    ///
    /// Returns the buffer index the guest callback (if any) used, so the
    /// caller knows which half to drain for output.
    pub fn run_backend_cycle(&self, n_frames: u32, now_ns: u64) -> u8 {
        let index = self.buffer_index();
        self.sample_position.fetch_add(n_frames as u64, Ordering::AcqRel);
        self.time_stamp.store(now_ns, Ordering::Release);

        self.sem1.post();
        self.sem2.wait();

        self.buffer_index.store(index ^ 1, Ordering::Release);
        index
    }

    /// **Guest thread.** One iteration of the loop described in spec
    /// §4.E: wait on `sem1`; if `terminate`, signal stopped and return
    /// `None`; else build the `CycleContext` for this cycle and return it
    /// (the caller invokes the actual guest callback), then post `sem2`.
    ///
    /// `build_time_info` is only invoked when the core is running and
    /// `time_info_mode` applies — it's a closure so the guest-thread loop
    /// doesn't need to know about sample rates or transport state itself.
    pub fn guest_cycle(&self, time_info_mode: bool, build_time_info: impl FnOnce() -> TimeInfo) -> Option<CycleContext> {
        self.sem1.wait();

        if self.terminate.load(Ordering::Acquire) {
            self.guest_thread_stopped.post();
            return None;
        }

        if !self.is_running() {
            self.sem2.post();
            return Some(CycleContext { buffer_index: self.buffer_index(), is_priming: false, time_info: None });
        }

        let context = CycleContext {
            buffer_index: self.buffer_index(),
            is_priming: false,
            time_info: time_info_mode.then(build_time_info),
        };
        Some(context)
    }

    /// Call after the guest callback body has produced its outputs for
    /// this cycle, to release the backend thread waiting in
    /// `run_backend_cycle`.
    pub fn guest_cycle_done(&self) {
        self.sem2.post();
    }

    /// **Priming cycle** (spec §4.E "Priming"): runs inline on the
    /// control-plane thread that called `start`, *before* any backend
    /// cycle has occurred. Zeroes staging is the caller's job (it owns
    /// the `ChannelSet`); this just builds the priming context, invokes
    /// `on_cycle`, and flips `buffer_index`.
    pub fn run_priming_cycle(&self, on_cycle: impl FnOnce(CycleContext)) {
        let context = CycleContext { buffer_index: self.buffer_index(), is_priming: true, time_info: None };
        on_cycle(context);
        self.buffer_index.fetch_xor(1, Ordering::AcqRel);
    }

    /// Signals the guest thread to exit: sets `terminate`, posts `sem1`
    /// once to unblock it, then waits for `guest_thread_stopped`. Safe to
    /// call even if the guest thread already saw `running == false` and
    /// is parked on `sem1` from a prior no-op cycle.
    pub fn shutdown_guest_thread(&self) {
        self.terminate.store(true, Ordering::Release);
        self.sem1.post();
        self.guest_thread_stopped.wait();
    }

    /// Called once by the guest thread after it has entered its loop, so
    /// `open` can block until the thread is actually ready to receive
    /// `sem1` posts.
    pub fn signal_guest_thread_started(&self) {
        self.guest_thread_started.post();
    }

    /// Blocks until [`signal_guest_thread_started`](Self::signal_guest_thread_started)
    /// has been called.
    pub fn wait_guest_thread_started(&self) {
        self.guest_thread_started.wait();
    }
}

impl Default for RendezvousCore {
    fn default() -> Self {
        RendezvousCore::new()
    }
}

/// Copies `n` active input channels from backend-provided buffers into
/// their staging half, applying the sample converter — spec §4.E step 2.
/// `inputs` must be exactly `channels.inputs.len()` long, each entry
/// either `None` (inactive/unmapped channel, skipped) or `Some(slice of n
/// backend floats)`.
///
/// # Safety
/// Must only be called from the backend realtime thread, for the half
/// `index` that thread currently owns (i.e. immediately before
/// `RendezvousCore::run_backend_cycle`'s `sem1` post).
pub unsafe fn stage_inputs(channels: &ChannelSet, index: u8, inputs: &[Option<&[f32]>]) {
    for (channel, samples) in channels.inputs.iter().zip(inputs) {
        if !channel.active {
            continue;
        }
        if let Some(samples) = samples {
            channel.staging.half_mut(index).fill_from_backend(samples);
        }
    }
}

/// Copies `n` active output channels from their staging half into
/// backend-provided buffers, applying the reverse converter — spec §4.E
/// step 6. Buffers for inactive/unmapped channels are left untouched
/// (callers should have zeroed them already if that matters).
///
/// # Safety
/// Must only be called from the backend realtime thread, for the half
/// `index` that thread currently owns (i.e. immediately after
/// `RendezvousCore::run_backend_cycle` returns).
pub unsafe fn drain_outputs(channels: &ChannelSet, index: u8, outputs: &mut [Option<&mut [f32]>]) {
    for (channel, samples) in channels.outputs.iter().zip(outputs.iter_mut()) {
        if !channel.active {
            continue;
        }
        if let Some(samples) = samples {
            channel.staging.half(index).drain_to_backend(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn semaphore_wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = sem.clone();
        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(std::time::Duration::from_millis(20));
        sem.post();
        handle.join().unwrap();
    }

    #[test]
    fn backend_cycle_round_trips_with_guest_thread() {
        let core = Arc::new(RendezvousCore::new());
        core.reset_for_start();

        let guest_core = core.clone();
        let guest = thread::spawn(move || {
            guest_core.signal_guest_thread_started();
            loop {
                match guest_core.guest_cycle(false, || unreachable!()) {
                    Some(_ctx) => guest_core.guest_cycle_done(),
                    None => break,
                }
            }
        });

        core.wait_guest_thread_started();
        for _ in 0..5 {
            core.run_backend_cycle(128, 0);
        }
        assert_eq!(core.sample_position(), 5 * 128);

        core.shutdown_guest_thread();
        guest.join().unwrap();
    }

    #[test]
    fn buffer_index_flips_every_cycle() {
        let core = Arc::new(RendezvousCore::new());
        core.reset_for_start();
        let responder = core.clone();
        let handle = thread::spawn(move || {
            responder.sem1.wait();
            responder.sem2.post();
        });
        let first = core.run_backend_cycle(64, 0);
        handle.join().unwrap();
        assert_eq!(first, 0);
        assert_eq!(core.buffer_index(), 1);
    }

    #[test]
    fn priming_cycle_flips_index_and_marks_priming() {
        let core = RendezvousCore::new();
        let mut observed = None;
        core.run_priming_cycle(|ctx| observed = Some(ctx));
        let ctx = observed.unwrap();
        assert!(ctx.is_priming);
        assert_eq!(ctx.buffer_index, 0);
        assert_eq!(core.buffer_index(), 1);
    }
}
