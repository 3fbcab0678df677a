//! Reconciliation state machine.
//!
//! ```text
//! Idle --Drifted--> Diverged --Started--> CreatingRevision
//! CreatingRevision --Created--> AdvancingCounter --Advanced--> Idle
//! CreatingRevision --CreationFailed--> Failing
//! AdvancingCounter --LostRace--> Failing
//! Failing --Tick--> Idle
//! Idle --Current--> Idle
//! ```

use crate::error::{ControllerError, ControllerResult};

/// Where a sync pass currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    #[default]
    Idle,
    Diverged,
    CreatingRevision,
    AdvancingCounter,
    Failing,
}

/// Something that happened during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    /// Snapshots match their sources.
    Current,
    /// At least one source differs from its snapshot.
    Drifted,
    /// Revision creation began.
    Started,
    /// Every required snapshot was written.
    Created,
    /// A snapshot could not be written.
    CreationFailed,
    /// The counter was advanced.
    Advanced,
    /// Another writer advanced the counter first.
    LostRace,
    /// A new pass began.
    Tick,
}

impl SyncState {
    /// Returns the state reached on `event`, or `None` if not allowed.
    pub fn next(self, event: SyncEvent) -> Option<SyncState> {
        use SyncEvent::*;
        use SyncState::*;

        match (self, event) {
            (Idle, Current) => Some(Idle),
            (Idle, Drifted) => Some(Diverged),
            (Diverged, Started) => Some(CreatingRevision),
            (CreatingRevision, Created) => Some(AdvancingCounter),
            (CreatingRevision, CreationFailed) => Some(Failing),
            (AdvancingCounter, Advanced) => Some(Idle),
            (AdvancingCounter, LostRace) => Some(Failing),
            (Failing, Tick) => Some(Idle),
            _ => None,
        }
    }
}

/// States visited by one pass, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTrace {
    states: Vec<SyncState>,
}

impl SyncTrace {
    /// Starts a pass after a previous one ended in `previous`.
    ///
    /// A pass that ended `Failing` ticks back to `Idle` first; any other
    /// state (including one interrupted by a transport error) starts over
    /// from `Idle`.
    pub fn begin(previous: SyncState) -> Self {
        let states = match previous {
            SyncState::Failing => vec![SyncState::Failing, SyncState::Idle],
            _ => vec![SyncState::Idle],
        };
        Self { states }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.states.last().copied().unwrap_or_default()
    }

    /// Applies an event, recording the new state.
    pub fn advance(&mut self, event: SyncEvent) -> ControllerResult<SyncState> {
        let from = self.state();
        let to = from
            .next(event)
            .ok_or(ControllerError::InvalidTransition { from, event })?;
        self.states.push(to);
        Ok(to)
    }

    /// Every state visited so far.
    pub fn states(&self) -> &[SyncState] {
        &self.states
    }
}

impl Default for SyncTrace {
    fn default() -> Self {
        Self::begin(SyncState::Idle)
    }
}
