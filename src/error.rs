//! Error kinds returned by the driver façade, and their mapping onto the
//! small set of ASIO sentinel codes the guest understands.
//!
//! Internal realtime paths never return these to the guest: a cycle that
//! can't proceed normally emits silence and, at most, fires the one-time
//! shutdown notification (see [`crate::rendezvous`]).

use thiserror::Error;

/// Everything a façade operation in [`crate::driver`] can fail with.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    /// The backend library is missing, or the client failed to open.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The operation is not legal in the driver's current state.
    #[error("operation not legal in current state")]
    WrongState,

    /// A null pointer, out-of-range channel, or malformed `ASIOBufferInfo`.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Buffer size outside the allowed set, or an unsupported sample rate.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// A sample rate change request was not honored.
    #[error("sample rate not honored: requested {requested} Hz, have {current} Hz")]
    NoClock {
        /// The rate the guest asked for.
        requested: f64,
        /// The rate actually in effect.
        current: f64,
    },

    /// Staging allocation failed.
    #[error("out of memory allocating staging buffers")]
    NoMemory,

    /// The backend refused a buffer-size change.
    #[error("backend refused buffer size change to {0} frames")]
    HardwareMalfunction(u32),

    /// An optional feature was deliberately declined.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
}

/// Shorthand for façade operation results.
pub type DriverResult<T> = Result<T, DriverError>;

/// The handful of ASIO sentinel codes `DriverError` maps onto.
///
/// Grounded in the wineasio `asio.c` wrapper functions, which return these
/// literal mnemonics from the ASIO 2 SDK's `asio.h`.
pub mod sentinel {
    /// `ASE_OK` — the operation succeeded.
    pub const ASE_OK: i32 = 0;
    /// `ASE_SUCCESS` — used only by `Future`'s boolean-ish selectors.
    pub const ASE_SUCCESS: i32 = 0x3f4847a0u32 as i32;
    /// `ASE_NotPresent` — hardware input or output is not present or
    /// available; also used by wineasio for "wrong state" and "feature
    /// absent" alike.
    pub const ASE_NOT_PRESENT: i32 = -1000;
    /// `ASE_HWMalfunction` — hardware is malfunctioning.
    pub const ASE_HW_MALFUNCTION: i32 = -999;
    /// `ASE_InvalidParameter` — an invalid parameter was passed.
    pub const ASE_INVALID_PARAMETER: i32 = -998;
    /// `ASE_InvalidMode` — an invalid mode for this operation.
    pub const ASE_INVALID_MODE: i32 = -997;
    /// `ASE_NoClock` — no clock is present.
    pub const ASE_NO_CLOCK: i32 = -995;
    /// `ASE_NoMemory` — not enough memory to complete the request.
    pub const ASE_NO_MEMORY: i32 = -994;
}

/// Maps a [`DriverError`] to the ASIO sentinel a guest-facing shim would
/// forward. `WrongState` reuses `ASE_NotPresent`, matching the original
/// wineasio wrappers which have no distinct "wrong state" code either.
pub fn to_asio_sentinel(err: &DriverError) -> i32 {
    use sentinel::*;
    match err {
        DriverError::Unavailable(_) => ASE_NOT_PRESENT,
        DriverError::WrongState => ASE_NOT_PRESENT,
        DriverError::InvalidParameter(_) => ASE_INVALID_PARAMETER,
        DriverError::InvalidMode(_) => ASE_INVALID_MODE,
        DriverError::NoClock { .. } => ASE_NO_CLOCK,
        DriverError::NoMemory => ASE_NO_MEMORY,
        DriverError::HardwareMalfunction(_) => ASE_HW_MALFUNCTION,
        DriverError::NotSupported(_) => ASE_NOT_PRESENT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_state_maps_to_not_present() {
        assert_eq!(to_asio_sentinel(&DriverError::WrongState), sentinel::ASE_NOT_PRESENT);
    }

    #[test]
    fn no_clock_carries_both_rates() {
        let err = DriverError::NoClock { requested: 44_100.0, current: 48_000.0 };
        assert!(err.to_string().contains("44100"));
    }
}
