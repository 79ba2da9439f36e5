//! Session lifecycle state machine.
//!
//! A session moves through the following states:
//!
//! - `Uninitialized`: no driver resources held
//! - `Initializing`: stack bring-up in progress
//! - `Ready`: stack up, operations allowed
//! - `Deinitializing`: teardown in progress
//! - `Recovering`: emergency recovery is cycling the stack
//!
//! # Valid Transitions
//!
//! - Uninitialized → Initializing → Ready | Uninitialized
//! - Ready → Deinitializing → Uninitialized
//! - Ready → Recovering → Ready | Uninitialized
//!
//! # Examples
//!
//! ```
//! use nfclink_bridge::lifecycle::{LifecycleState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! machine.transition_to(LifecycleState::Initializing).unwrap();
//! machine.transition_to(LifecycleState::Ready).unwrap();
//! assert!(machine.transition_to(LifecycleState::Initializing).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use nfclink_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum number of state transitions to keep in history.
const MAX_HISTORY_SIZE: usize = 32;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No driver resources held.
    Uninitialized,

    /// Stack bring-up in progress.
    Initializing,

    /// Stack up; discovery, peer link and socket operations allowed.
    Ready,

    /// Teardown in progress.
    Deinitializing,

    /// Emergency recovery is cycling the stack.
    Recovering,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            LifecycleState::Uninitialized => "Uninitialized",
            LifecycleState::Initializing => "Initializing",
            LifecycleState::Ready => "Ready",
            LifecycleState::Deinitializing => "Deinitializing",
            LifecycleState::Recovering => "Recovering",
        };
        write!(f, "{}", state_str)
    }
}

impl LifecycleState {
    /// Check if transition to target state is valid from this state.
    ///
    /// ```
    /// use nfclink_bridge::lifecycle::LifecycleState;
    ///
    /// assert!(LifecycleState::Ready.can_transition_to(&LifecycleState::Recovering));
    /// assert!(!LifecycleState::Uninitialized.can_transition_to(&LifecycleState::Ready));
    /// ```
    pub fn can_transition_to(&self, target: &LifecycleState) -> bool {
        matches!(
            (self, target),
            // From Uninitialized
            (LifecycleState::Uninitialized, LifecycleState::Initializing)
            // From Initializing
            | (LifecycleState::Initializing, LifecycleState::Ready | LifecycleState::Uninitialized)
            // From Ready
            | (LifecycleState::Ready, LifecycleState::Deinitializing | LifecycleState::Recovering)
            // From Deinitializing
            | (LifecycleState::Deinitializing, LifecycleState::Uninitialized)
            // From Recovering
            | (LifecycleState::Recovering, LifecycleState::Ready | LifecycleState::Uninitialized)
        )
    }

    /// Check whether driver resources may be held in this state.
    pub fn holds_stack(&self) -> bool {
        !matches!(self, LifecycleState::Uninitialized)
    }
}

/// A single state transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,

    /// Not serialized; set to the time of deserialization.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: LifecycleState, to: LifecycleState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Lifecycle state machine with a bounded transition history.
///
/// Not thread-safe; the session keeps it behind its state mutex.
#[derive(Debug)]
pub struct StateMachine {
    current_state: LifecycleState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl StateMachine {
    /// Create a new state machine in the `Uninitialized` state.
    pub fn new() -> Self {
        Self {
            current_state: LifecycleState::Uninitialized,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> LifecycleState {
        self.current_state
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the transition is not
    /// allowed from the current state. The machine is left unchanged.
    pub fn transition_to(&mut self, new_state: LifecycleState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;
        self.state_entered_at = transition.timestamp;

        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }

        Ok(transition)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_new_machine_starts_uninitialized() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), LifecycleState::Uninitialized);
        assert!(machine.history().is_empty());
    }

    #[rstest]
    #[case(LifecycleState::Uninitialized, LifecycleState::Initializing, true)]
    #[case(LifecycleState::Uninitialized, LifecycleState::Ready, false)]
    #[case(LifecycleState::Initializing, LifecycleState::Ready, true)]
    #[case(LifecycleState::Initializing, LifecycleState::Uninitialized, true)]
    #[case(LifecycleState::Ready, LifecycleState::Deinitializing, true)]
    #[case(LifecycleState::Ready, LifecycleState::Recovering, true)]
    #[case(LifecycleState::Ready, LifecycleState::Uninitialized, false)]
    #[case(LifecycleState::Ready, LifecycleState::Initializing, false)]
    #[case(LifecycleState::Deinitializing, LifecycleState::Uninitialized, true)]
    #[case(LifecycleState::Deinitializing, LifecycleState::Ready, false)]
    #[case(LifecycleState::Recovering, LifecycleState::Ready, true)]
    #[case(LifecycleState::Recovering, LifecycleState::Uninitialized, true)]
    #[case(LifecycleState::Recovering, LifecycleState::Deinitializing, false)]
    fn test_transition_table(
        #[case] from: LifecycleState,
        #[case] to: LifecycleState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    #[test]
    fn test_full_cycle_records_history() {
        let mut machine = StateMachine::new();
        machine.transition_to(LifecycleState::Initializing).unwrap();
        machine.transition_to(LifecycleState::Ready).unwrap();
        machine.transition_to(LifecycleState::Recovering).unwrap();
        machine.transition_to(LifecycleState::Ready).unwrap();
        machine.transition_to(LifecycleState::Deinitializing).unwrap();
        let last = machine
            .transition_to(LifecycleState::Uninitialized)
            .unwrap();

        assert_eq!(last.from, LifecycleState::Deinitializing);
        assert_eq!(machine.history().len(), 6);
        assert!(!machine.current_state().holds_stack());
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut machine = StateMachine::new();
        let err = machine.transition_to(LifecycleState::Ready).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid state transition from Uninitialized to Ready"
        );
        assert_eq!(machine.current_state(), LifecycleState::Uninitialized);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = StateMachine::new();
        machine.transition_to(LifecycleState::Initializing).unwrap();
        machine.transition_to(LifecycleState::Ready).unwrap();
        for _ in 0..MAX_HISTORY_SIZE {
            machine.transition_to(LifecycleState::Recovering).unwrap();
            machine.transition_to(LifecycleState::Ready).unwrap();
        }
        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&LifecycleState::Deinitializing).unwrap();
        assert_eq!(json, "\"deinitializing\"");
    }
}
