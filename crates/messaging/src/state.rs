//! Lifecycle of a caller-side stream.

use std::fmt;

/// State of a stream issued by this side of the channel.
///
/// `Idle → Started → Streaming* → Completed | Errored | Cancelled`.
/// Terminal states absorb every further event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Registered, `stream-start` not yet sent.
    Idle,
    /// `stream-start` sent, nothing received yet.
    Started,
    /// At least one value received.
    Streaming,
    /// The peer ended the stream.
    Completed,
    /// The peer failed the stream, or the channel was disposed.
    Errored,
    /// Cancelled locally.
    Cancelled,
}

/// Inputs that drive [`CallState`] transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallEvent {
    /// `stream-start` went out.
    Start,
    /// `stream-data` arrived.
    Next,
    /// `stream-error` arrived or the channel was disposed.
    Error,
    /// `stream-end` arrived.
    Complete,
    /// The caller cancelled.
    Cancel,
}

impl CallState {
    /// Whether no further events are accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    /// Applies an event, returning the next state or `None` if the event must
    /// be ignored.
    ///
    /// Replies may be dispatched before the caller records `Start`, so data and
    /// terminal events are accepted from `Idle` as well.
    #[must_use]
    pub const fn on(self, event: CallEvent) -> Option<Self> {
        if self.is_terminal() {
            return None;
        }

        match (self, event) {
            (Self::Idle, CallEvent::Start) => Some(Self::Started),
            (_, CallEvent::Start) => None,
            (_, CallEvent::Next) => Some(Self::Streaming),
            (_, CallEvent::Error) => Some(Self::Errored),
            (_, CallEvent::Complete) => Some(Self::Completed),
            (_, CallEvent::Cancel) => Some(Self::Cancelled),
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = CallState::Idle;
        let state = state.on(CallEvent::Start).unwrap();
        assert_eq!(state, CallState::Started);
        let state = state.on(CallEvent::Next).unwrap();
        let state = state.on(CallEvent::Next).unwrap();
        assert_eq!(state, CallState::Streaming);
        assert_eq!(state.on(CallEvent::Complete), Some(CallState::Completed));
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [
            CallState::Completed,
            CallState::Errored,
            CallState::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for event in [
                CallEvent::Start,
                CallEvent::Next,
                CallEvent::Error,
                CallEvent::Complete,
                CallEvent::Cancel,
            ] {
                assert_eq!(terminal.on(event), None);
            }
        }
    }

    #[test]
    fn test_cancel_reachable_from_every_live_state() {
        for live in [CallState::Idle, CallState::Started, CallState::Streaming] {
            assert_eq!(live.on(CallEvent::Cancel), Some(CallState::Cancelled));
        }
    }

    #[test]
    fn test_start_only_from_idle() {
        assert_eq!(CallState::Streaming.on(CallEvent::Start), None);
        assert_eq!(CallState::Started.on(CallEvent::Start), None);
    }

    #[test]
    fn test_reply_before_start_is_accepted() {
        assert_eq!(CallState::Idle.on(CallEvent::Next), Some(CallState::Streaming));
    }
}
