//! Connection lifecycle of the safety layer.
//!
//! Like its redundancy layer counterpart, the machine is a pure state holder
//! returning the follow-up action a transition requires; the connection core
//! executes it. Events in states they do not apply to are ignored.

use rasta_common::logging;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SrState {
    /// No connection.
    Closed,
    /// Connection request sent, waiting for the response.
    Start,
    /// Connected, regular exchange.
    Up,
    /// Sequence gap detected, retransmission requested.
    RetrReq,
    /// Peer replays its send buffer.
    RetrRun,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SrEvent {
    Open,
    Close,
    ConnReqReceived,
    ConnRespReceived,
    HeartbeatReceived,
    DataReceived,
    RetrReqReceived,
    RetrRespReceived,
    RetrDataReceived,
    DiscReqReceived,
    SequenceGap,
    HeartbeatDue,
    TimeoutTmax,
}

/// Follow-up work a transition requires from the connection core.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SrAction {
    SendConnReq,
    SendConnResp,
    SendHeartbeat,
    SendRetrReq,
    SendDiscReq,
    RunRetransmission,
    AdoptRetrNumbering,
    DeliverData,
}

pub struct SrStateMachine {
    state: SrState,
    log: logging::Logger,
}

impl SrStateMachine {
    pub fn new(log: &logging::Logger) -> SrStateMachine {
        SrStateMachine {
            state: SrState::Closed,
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn state(&self) -> SrState {
        self.state
    }

    /// Resets the machine without side effects, used when a connection is
    /// torn down by the core itself.
    pub fn reset(&mut self) {
        self.state = SrState::Closed;
    }

    /// Processes an event, returning the action the core must execute.
    pub fn process_event(&mut self, event: SrEvent) -> Option<SrAction> {
        use self::SrEvent::*;
        use self::SrState::*;

        let (next, action) = match (self.state, event) {
            // Connection establishment, both roles.
            (Closed, Open) => (Start, Some(SrAction::SendConnReq)),
            (Closed, ConnReqReceived) => (Up, Some(SrAction::SendConnResp)),
            (Start, ConnRespReceived) => (Up, Some(SrAction::SendHeartbeat)),

            // Regular exchange. Retransmitted data still arrives in the up
            // state when the replay plan placed it after the end of
            // retransmission heartbeat.
            (Up, DataReceived) => (Up, Some(SrAction::DeliverData)),
            (Up, RetrDataReceived) => (Up, Some(SrAction::DeliverData)),
            (Up, HeartbeatReceived) => (Up, None),
            (Up, HeartbeatDue) => (Up, Some(SrAction::SendHeartbeat)),
            (Up, SequenceGap) => (RetrReq, Some(SrAction::SendRetrReq)),
            (Up, RetrReqReceived) => (Up, Some(SrAction::RunRetransmission)),

            // Waiting for the peer to acknowledge our retransmission request.
            (RetrReq, RetrRespReceived) => (RetrRun, Some(SrAction::AdoptRetrNumbering)),
            (RetrReq, RetrReqReceived) => (RetrReq, Some(SrAction::RunRetransmission)),
            (RetrReq, HeartbeatDue) => (RetrReq, Some(SrAction::SendHeartbeat)),

            // Replay in progress.
            (RetrRun, RetrDataReceived) => (RetrRun, Some(SrAction::DeliverData)),
            (RetrRun, DataReceived) => (Up, Some(SrAction::DeliverData)),
            (RetrRun, HeartbeatReceived) => (Up, None),
            (RetrRun, HeartbeatDue) => (RetrRun, Some(SrAction::SendHeartbeat)),

            // Teardown. A local close and the supervision timeout both tell
            // the peer; a received disconnect does not get an answer.
            (Start, Close) | (Up, Close) | (RetrReq, Close) | (RetrRun, Close) => {
                (Closed, Some(SrAction::SendDiscReq))
            }
            (Start, TimeoutTmax) | (Up, TimeoutTmax) | (RetrReq, TimeoutTmax)
            | (RetrRun, TimeoutTmax) => (Closed, Some(SrAction::SendDiscReq)),
            (Start, DiscReqReceived) | (Up, DiscReqReceived) | (RetrReq, DiscReqReceived)
            | (RetrRun, DiscReqReceived) => (Closed, None),

            (state, event) => {
                logging::trace!(self.log, "event ignored";
                                "state" => ?state, "event" => ?event);
                (state, None)
            }
        };

        if next != self.state {
            logging::debug!(self.log, "connection state transition";
                            "from" => ?self.state, "to" => ?next, "event" => ?event);
            self.state = next;
        }

        action
    }
}
