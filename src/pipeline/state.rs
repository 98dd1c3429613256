//! Session lifecycle state machine

use std::fmt;
use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use tracing::debug;

use crate::capture::device::DeviceEvent;

/// Lifecycle of one capture/processing/render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Opening,
    Streaming,
    Reconfiguring,
    Closing,
    Failed,
}

/// Inputs to [`SessionState::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StartRequested,
    Device(DeviceEvent),
    /// A frame made it through transform and publish.
    FirstFrame,
    ConfigurationFailed,
    ReconfigureRequested,
    StopRequested,
    /// All session resources have been released.
    Released,
}

impl SessionState {
    /// Transition function. `None` means the event does not apply in this
    /// state and is ignored.
    ///
    /// A device error while streaming lands in `Failed` and stays there: the
    /// owner must call `stop()` (or `start()` again) to release the session.
    pub fn next(self, event: &SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, event) {
            (S::Idle | S::Failed | S::Reconfiguring, E::StartRequested) => S::Opening,
            (S::Opening, E::Device(DeviceEvent::Opened)) => S::Opening,
            (S::Opening, E::FirstFrame) => S::Streaming,
            (S::Opening, E::ConfigurationFailed) => S::Failed,
            (S::Opening | S::Streaming, E::ReconfigureRequested) => S::Reconfiguring,
            (
                S::Opening | S::Streaming | S::Reconfiguring,
                E::Device(DeviceEvent::Disconnected | DeviceEvent::Error(_)),
            ) => S::Failed,
            (S::Idle, E::StopRequested) => S::Idle,
            (_, E::StopRequested) => S::Closing,
            (S::Closing, E::Released) => S::Idle,
            _ => return None,
        };
        Some(next)
    }

    /// Whether a session (and its capture thread) may be alive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Opening | SessionState::Streaming | SessionState::Reconfiguring
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Streaming => "streaming",
            SessionState::Reconfiguring => "reconfiguring",
            SessionState::Closing => "closing",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free holder of the current [`SessionState`].
///
/// Written by the controller and by the capture thread; every write goes
/// through [`SessionState::next`].
#[derive(Clone, Default)]
pub struct StateCell {
    inner: Arc<AtomicCell<SessionState>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        self.inner.load()
    }

    /// Apply `event`, returning the resulting state, or `None` if the event
    /// was ignored in the current state.
    pub fn apply(&self, event: &SessionEvent) -> Option<SessionState> {
        let mut current = self.inner.load();
        loop {
            let next = current.next(event)?;
            match self.inner.compare_exchange(current, next) {
                Ok(_) => {
                    if next != current {
                        debug!(from = %current, to = %next, ?event, "session state");
                    }
                    return Some(next);
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}
