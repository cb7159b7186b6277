//! Per-channel state: active flag, backend port handle, port name, and the
//! double-buffered sample staging shared between the backend and guest
//! realtime threads.

use std::cell::UnsafeCell;

use crate::backend::PortHandle;
use crate::convert::{self, SampleFormat};

/// One half of a channel's double-buffered staging, holding samples
/// already converted to the guest's chosen [`SampleFormat`].
///
/// Grounded in spec §4.E step 2: the sample converter runs on the copy
/// *into* staging, not on every later read, so the guest touches its
/// native format directly.
#[derive(Debug, Clone)]
pub enum StagingBuffer {
    /// 32-bit float samples.
    Float32(Vec<f32>),
    /// 32-bit integer samples.
    Int32(Vec<i32>),
    /// 16-bit integer samples.
    Int16(Vec<i16>),
}

impl StagingBuffer {
    /// Allocates a zeroed buffer of `frames` samples in the given format.
    pub fn zeroed(fmt: SampleFormat, frames: usize) -> Self {
        match fmt {
            SampleFormat::Float32LE => StagingBuffer::Float32(vec![0.0; frames]),
            SampleFormat::Int32LE => StagingBuffer::Int32(vec![0; frames]),
            SampleFormat::Int16LE => StagingBuffer::Int16(vec![0; frames]),
        }
    }

    /// Number of samples this half holds.
    pub fn len(&self) -> usize {
        match self {
            StagingBuffer::Float32(v) => v.len(),
            StagingBuffer::Int32(v) => v.len(),
            StagingBuffer::Int16(v) => v.len(),
        }
    }

    /// Whether this half holds zero samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resets every sample to silence.
    pub fn clear_to_silence(&mut self) {
        match self {
            StagingBuffer::Float32(v) => v.iter_mut().for_each(|s| *s = 0.0),
            StagingBuffer::Int32(v) => v.iter_mut().for_each(|s| *s = 0),
            StagingBuffer::Int16(v) => v.iter_mut().for_each(|s| *s = 0),
        }
    }

    /// Converts `src` (backend-native floats, captured input) into this
    /// half, applying the sample converter.
    pub fn fill_from_backend(&mut self, src: &[f32]) {
        match self {
            StagingBuffer::Float32(v) => v[..src.len()].copy_from_slice(src),
            StagingBuffer::Int32(v) => {
                for (d, &s) in v.iter_mut().zip(src) {
                    *d = convert::f32_to_i32(s);
                }
            }
            StagingBuffer::Int16(v) => {
                for (d, &s) in v.iter_mut().zip(src) {
                    *d = convert::f32_to_i16(s);
                }
            }
        }
    }

    /// Converts this half (guest-produced output) into `dst`
    /// (backend-native floats), applying the reverse converter.
    pub fn drain_to_backend(&self, dst: &mut [f32]) {
        match self {
            StagingBuffer::Float32(v) => dst.copy_from_slice(&v[..dst.len()]),
            StagingBuffer::Int32(v) => {
                for (d, &s) in dst.iter_mut().zip(v) {
                    *d = convert::i32_to_f32(s);
                }
            }
            StagingBuffer::Int16(v) => {
                for (d, &s) in dst.iter_mut().zip(v) {
                    *d = convert::i16_to_f32(s);
                }
            }
        }
    }

    /// Raw pointer to the first sample, for handing to the guest as an
    /// `ASIOBufferInfo`-style buffer pointer. The caller is responsible for
    /// only dereferencing it while it holds the half this cycle assigns it.
    pub fn as_mut_ptr_bytes(&mut self) -> *mut u8 {
        match self {
            StagingBuffer::Float32(v) => v.as_mut_ptr() as *mut u8,
            StagingBuffer::Int32(v) => v.as_mut_ptr() as *mut u8,
            StagingBuffer::Int16(v) => v.as_mut_ptr() as *mut u8,
        }
    }
}

/// The two staging halves for one channel, addressed by `buffer_index`.
///
/// Wrapped in `UnsafeCell` rather than a `Mutex`: the rendezvous protocol
/// (§4.E, §5) already guarantees the backend and guest threads never touch
/// the same half at the same instant, so a lock here would only add
/// uncontended overhead to the hot path. Access outside that protocol is
/// unsound; nothing outside `rendezvous` reaches into this type.
#[derive(Debug)]
pub struct ChannelStaging {
    halves: [UnsafeCell<StagingBuffer>; 2],
}

// Safety: the rendezvous protocol (sem1/sem2 handoff) is the sole access
// path and guarantees disjoint half ownership at every instant (invariant
// 5). No other code reaches `halves` directly.
unsafe impl Sync for ChannelStaging {}

impl ChannelStaging {
    /// Allocates both halves, zeroed, in the given format and frame count.
    pub fn new(fmt: SampleFormat, frames: usize) -> Self {
        ChannelStaging {
            halves: [
                UnsafeCell::new(StagingBuffer::zeroed(fmt, frames)),
                UnsafeCell::new(StagingBuffer::zeroed(fmt, frames)),
            ],
        }
    }

    /// Mutable access to half `index` (0 or 1). Caller must hold exclusive
    /// rendezvous ownership of that half for the duration of the borrow.
    ///
    /// # Safety
    /// Must only be called from the one thread the rendezvous protocol
    /// currently grants ownership of `index` to.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn half_mut(&self, index: u8) -> &mut StagingBuffer {
        &mut *self.halves[index as usize & 1].get()
    }

    /// Shared access to half `index`. Same safety contract as [`half_mut`](Self::half_mut).
    ///
    /// # Safety
    /// Must only be called from the one thread the rendezvous protocol
    /// currently grants ownership of `index` to.
    pub unsafe fn half(&self, index: u8) -> &StagingBuffer {
        &*self.halves[index as usize & 1].get()
    }
}

/// One guest-visible channel: a port slot plus its staging, in either the
/// input or output set.
#[derive(Debug)]
pub struct IoChannel {
    /// Whether the guest included this channel when allocating buffers.
    pub active: bool,
    /// The backend port registered for this channel, once `open` has run.
    pub port: Option<PortHandle>,
    /// The short name this channel registered its port under (`in_1`,
    /// `out_2`, ...).
    pub port_name: String,
    /// The double-buffered staging this channel hands to the rendezvous.
    pub staging: ChannelStaging,
}

impl IoChannel {
    fn new(port_name: String, fmt: SampleFormat, frames: usize) -> Self {
        IoChannel {
            active: false,
            port: None,
            port_name,
            staging: ChannelStaging::new(fmt, frames),
        }
    }

    /// Replaces this channel's staging in place, keeping its port and
    /// name untouched. Used by `create_buffers` when the negotiated
    /// buffer size or sample format changes — ports are registered once
    /// at `open` and freed only on driver drop (spec §4.B), but staging
    /// is sized to the buffer size and must be re-created whenever that
    /// changes.
    pub fn resize_staging(&mut self, fmt: SampleFormat, frames: usize) {
        self.staging = ChannelStaging::new(fmt, frames);
    }

    /// Pointer to the first byte of staging half `index`, for handing to
    /// the guest as an `ASIOBufferInfo`-style buffer pointer at
    /// `create_buffers`. Only sound to call before the rendezvous core
    /// this channel belongs to is running — afterwards, the half is
    /// owned by whichever realtime thread the protocol currently grants
    /// it to.
    pub fn staging_ptr(&self, index: u8) -> *mut u8 {
        // Safety: called only from `create_buffers`, before `start` ever
        // marks the rendezvous core running, so no realtime thread holds
        // either half yet.
        unsafe { self.staging.half_mut(index).as_mut_ptr_bytes() }
    }
}

/// The fixed-size input and output channel arrays allocated at
/// `create_buffers` time, and re-created on every call (old staging is
/// simply dropped — see spec §4.B).
#[derive(Debug)]
pub struct ChannelSet {
    /// Input (capture) channels, one per configured input capacity.
    pub inputs: Vec<IoChannel>,
    /// Output (playback) channels, one per configured output capacity.
    pub outputs: Vec<IoChannel>,
}

impl ChannelSet {
    /// Allocates `n_in` input and `n_out` output channels, each named
    /// `<prefix>in_<k>` / `<prefix>out_<k>` (1-indexed), with zeroed
    /// staging sized for `frames` samples in `fmt`. Ports are not yet
    /// registered — that happens in `crate::driver` once a backend client
    /// handle exists.
    pub fn allocate(
        n_in: usize,
        n_out: usize,
        fmt: SampleFormat,
        frames: usize,
        input_prefix: &str,
        output_prefix: &str,
    ) -> Self {
        let inputs = (1..=n_in)
            .map(|k| IoChannel::new(format!("{input_prefix}{k}"), fmt, frames))
            .collect();
        let outputs = (1..=n_out)
            .map(|k| IoChannel::new(format!("{output_prefix}{k}"), fmt, frames))
            .collect();
        ChannelSet { inputs, outputs }
    }

    /// Marks exactly the channels named in `active_in`/`active_out`
    /// (0-indexed) as active; every other channel stays registered but
    /// inactive and is skipped on the hot path. This is the only mutation
    /// `activate` performs (spec §4.B).
    pub fn activate(&mut self, active_in: &[usize], active_out: &[usize]) {
        for ch in self.inputs.iter_mut() {
            ch.active = false;
        }
        for ch in self.outputs.iter_mut() {
            ch.active = false;
        }
        for &i in active_in {
            if let Some(ch) = self.inputs.get_mut(i) {
                ch.active = true;
            }
        }
        for &i in active_out {
            if let Some(ch) = self.outputs.get_mut(i) {
                ch.active = true;
            }
        }
    }

    /// Count of currently active input channels.
    pub fn active_input_count(&self) -> usize {
        self.inputs.iter().filter(|c| c.active).count()
    }

    /// Count of currently active output channels.
    pub fn active_output_count(&self) -> usize {
        self.outputs.iter().filter(|c| c.active).count()
    }

    /// Re-sizes every channel's staging for a new buffer size/format,
    /// leaving ports and names untouched. Called from `create_buffers`.
    pub fn resize_staging(&mut self, fmt: SampleFormat, frames: usize) {
        for ch in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            ch.resize_staging(fmt, frames);
        }
    }

    /// Zeroes both halves of every channel's staging. Called by `start`
    /// before priming (spec §4.E) — safe to call from a control-plane
    /// thread because no backend cycle touches staging until the
    /// rendezvous core is marked running.
    pub fn clear_all_staging(&mut self) {
        for ch in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            // Safety: called only from `start`, before `reset_for_start`
            // flips the rendezvous core to running, so no realtime
            // thread holds either half concurrently.
            unsafe {
                ch.staging.half_mut(0).clear_to_silence();
                ch.staging.half_mut(1).clear_to_silence();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_names_channels_one_indexed() {
        let set = ChannelSet::allocate(2, 3, SampleFormat::Float32LE, 64, "input_", "output_");
        assert_eq!(set.inputs[0].port_name, "input_1");
        assert_eq!(set.inputs[1].port_name, "input_2");
        assert_eq!(set.outputs[2].port_name, "output_3");
    }

    #[test]
    fn activate_marks_only_listed_channels() {
        let mut set = ChannelSet::allocate(2, 2, SampleFormat::Float32LE, 64, "input_", "output_");
        set.activate(&[0], &[0, 1]);
        assert!(set.inputs[0].active);
        assert!(!set.inputs[1].active);
        assert!(set.outputs[0].active);
        assert!(set.outputs[1].active);
        assert_eq!(set.active_input_count(), 1);
        assert_eq!(set.active_output_count(), 2);
    }

    #[test]
    fn staging_round_trips_through_int16_format() {
        let staging = ChannelStaging::new(SampleFormat::Int16LE, 4);
        let input = [0.5f32, -0.5, 0.0, 0.25];
        unsafe {
            staging.half_mut(0).fill_from_backend(&input);
            let mut out = [0.0f32; 4];
            staging.half(0).drain_to_backend(&mut out);
            for (a, b) in input.iter().zip(out.iter()) {
                assert!((a - b).abs() < 1.0 / 32000.0);
            }
        }
    }
}
