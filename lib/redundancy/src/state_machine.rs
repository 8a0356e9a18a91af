//! Per channel state machine of the redundancy layer.
//!
//! The machine is a pure state holder: it decides which follow-up action an
//! event triggers and the layer executes that action against the core. Events
//! arriving in the wrong state are ignored.

use rasta_common::logging;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RedState {
    Closed,
    Up,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RedEvent {
    Open,
    Close,
    ReceiveData,
    SendData,
    DeferTimeout,
}

/// Follow-up work a transition requires from the core.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RedAction {
    InitChannelData,
    ProcessReceivedMessage,
    SendPendingMessage,
    DrainDeferQueue,
}

pub struct RedStateMachine {
    state: RedState,
    log: logging::Logger,
}

impl RedStateMachine {
    pub fn new(log: &logging::Logger) -> RedStateMachine {
        RedStateMachine {
            state: RedState::Closed,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn state(&self) -> RedState {
        self.state
    }

    /// Processes an event, returning the action the layer must execute.
    pub fn process_event(&mut self, event: RedEvent) -> Option<RedAction> {
        let (next, action) = match (self.state, event) {
            (RedState::Closed, RedEvent::Open) => (RedState::Up, Some(RedAction::InitChannelData)),
            (RedState::Up, RedEvent::Close) => (RedState::Closed, None),
            (RedState::Up, RedEvent::ReceiveData) => {
                (RedState::Up, Some(RedAction::ProcessReceivedMessage))
            }
            (RedState::Up, RedEvent::SendData) => {
                (RedState::Up, Some(RedAction::SendPendingMessage))
            }
            (RedState::Up, RedEvent::DeferTimeout) => {
                (RedState::Up, Some(RedAction::DrainDeferQueue))
            }
            (state, event) => {
                logging::trace!(self.log, "event ignored";
                                "state" => ?state, "event" => ?event);
                (state, None)
            }
        };

        if next != self.state {
            logging::debug!(self.log, "channel state transition";
                            "from" => ?self.state, "to" => ?next, "event" => ?event);
            self.state = next;
        }

        action
    }
}
