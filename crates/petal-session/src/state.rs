//! The finite states of one invocation.

/// Lifecycle state of a call, independent of transport.
///
/// Transitions are monotonic in declaration order; a later state is
/// never revisited. The terminal outcomes (finished, aborted) are
/// delivered as events rather than stored here, because after either
/// one the session is inert.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    /// The call has been requested but the transport has not yet
    /// accepted the call-start operation.
    Preparing = 0,
    /// Start accepted; reads and writes may be in flight.
    Connected = 1,
    /// Client half-close issued; the read side stays open.
    WritesDone = 2,
    /// Terminal status fetch issued; no further state advancement.
    Finishing = 3,
}

impl CallState {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => CallState::Preparing,
            1 => CallState::Connected,
            2 => CallState::WritesDone,
            _ => CallState::Finishing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_by_progress() {
        assert!(CallState::Preparing < CallState::Connected);
        assert!(CallState::Connected < CallState::WritesDone);
        assert!(CallState::WritesDone < CallState::Finishing);
    }

    #[test]
    fn snapshot_encoding_round_trips() {
        for state in [
            CallState::Preparing,
            CallState::Connected,
            CallState::WritesDone,
            CallState::Finishing,
        ] {
            assert_eq!(CallState::from_u8(state.as_u8()), state);
        }
    }
}
