//! Per-send state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │    Composing    │ (initial)
//! └────────┬────────┘
//!          │ EchoShown                Rejected
//!          ▼                 ─────────────────────────┐
//! ┌─────────────────┐                                  │
//! │     Pending     │                                  │
//! └────────┬────────┘                                  │
//!          │ MessageCommitted        MessageFailed     │
//!          ▼                 ───────────────┐          │
//! ┌─────────────────┐                       ▼          ▼
//! │    Confirmed    │              ┌─────────────────────┐
//! └─────────────────┘              │       Failed        │
//!                                  └─────────────────────┘
//! ```
//!
//! A stale conversation summary does not change the send's state: once the
//! message append succeeds the send is `Confirmed`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub send_machine(Composing)

    Composing => {
        EchoShown => Pending,
        // Rejected locally, no echo was shown
        Rejected => Failed
    },
    Pending => {
        MessageCommitted => Confirmed,
        // Append failed; the echo is rolled back
        MessageFailed => Failed
    }
}

pub use send_machine::Input as SendMachineInput;
pub use send_machine::State as SendMachineState;
pub use send_machine::StateMachine as SendMachine;

/// Send state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Composing,
    Pending,
    Confirmed,
    Failed,
}

impl SendState {
    /// True once the send can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Confirmed | SendState::Failed)
    }
}

impl From<&SendMachineState> for SendState {
    fn from(state: &SendMachineState) -> Self {
        match state {
            SendMachineState::Composing => SendState::Composing,
            SendMachineState::Pending => SendState::Pending,
            SendMachineState::Confirmed => SendState::Confirmed,
            SendMachineState::Failed => SendState::Failed,
        }
    }
}
