//! The ASIO-mandated lifecycle: `Loaded → Initialized → Prepared → Running`.
//!
//! Every façade operation in [`crate::driver`] starts by checking the
//! current state against this table before touching anything else. Illegal
//! calls leave the state untouched and report [`crate::error::DriverError::WrongState`].

use std::fmt;

/// One of the four ordered lifecycle states a driver instance moves
/// through. Reverse edges only happen through explicit teardown
/// (`dispose_buffers`, `close`) — never a silent backward jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Freshly constructed; no backend client open yet.
    Loaded,
    /// Backend client open, ports registered, callbacks installed.
    Initialized,
    /// Buffers allocated, channels activated, backend client activated.
    Prepared,
    /// Rendezvous cycles are live.
    Running,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Loaded => "Loaded",
            DriverState::Initialized => "Initialized",
            DriverState::Prepared => "Prepared",
            DriverState::Running => "Running",
        };
        f.write_str(name)
    }
}

/// The one façade operation a state can legally accept, named for the
/// table in §4.D. `close`/`dispose_buffers`/`stop` are always legal from
/// any state at or past their target and are handled as teardown cascades
/// by the driver itself rather than through this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `open`: Loaded → Initialized.
    Open,
    /// `create_buffers`: Initialized → Prepared.
    CreateBuffers,
    /// `start`: Prepared → Running.
    Start,
}

impl DriverState {
    /// The state reached after legally performing `op` from `self`, or
    /// `None` if `op` is not legal from `self`.
    pub fn advance(self, op: Transition) -> Option<DriverState> {
        use DriverState::*;
        use Transition::*;
        match (self, op) {
            (Loaded, Open) => Some(Initialized),
            (Initialized, CreateBuffers) => Some(Prepared),
            (Prepared, Start) => Some(Running),
            _ => None,
        }
    }

    /// Whether `op` is legal from `self`.
    pub fn can(self, op: Transition) -> bool {
        self.advance(op).is_some()
    }
}
