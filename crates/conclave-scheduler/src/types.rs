//! Per-agent runtime state, kept separate from the static [`conclave_types::AgentConfig`] the
//! same way the design separates configuration from mutable state.

use std::collections::VecDeque;

use conclave_types::{AgentRunState, Message};

pub struct AgentRuntime {
    pub state: AgentRunState,
    pub iteration: u32,
    pub pending: VecDeque<(usize, Message)>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self {
            state: AgentRunState::Idle,
            iteration: 0,
            pending: VecDeque::new(),
        }
    }
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}
