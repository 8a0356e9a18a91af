//! Hand rolled test doubles for the layer's collaborators.

use crate::state_machine::SrState;
use crate::{LowerLayer, SrNotifications};
use rasta_common::platform::Platform;
use rasta_common::shared::{RastaError, RastaResult};
use rasta_common::{ConnectionId, RedChannelId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Lower layer double with scripted deliveries and a record of everything
/// handed down. The shared handle stays with the test while the mock moves
/// into the layer.
pub struct MockLowerLayer {
    state: Rc<RefCell<LowerState>>,
}

#[derive(Default)]
pub struct LowerState {
    sent: Vec<(RedChannelId, Vec<u8>)>,
    incoming: Vec<(RedChannelId, VecDeque<Vec<u8>>)>,
}

#[derive(Clone)]
pub struct LowerHandle {
    state: Rc<RefCell<LowerState>>,
}

impl MockLowerLayer {
    pub fn new() -> (MockLowerLayer, LowerHandle) {
        let state = Rc::new(RefCell::new(LowerState::default()));
        (
            MockLowerLayer {
                state: state.clone(),
            },
            LowerHandle { state },
        )
    }
}

impl LowerHandle {
    /// Queues a PDU for delivery on the given channel.
    pub fn push_incoming(&self, channel: RedChannelId, frame: &[u8]) {
        let mut state = self.state.borrow_mut();
        match state.incoming.iter_mut().find(|(id, _)| *id == channel) {
            Some((_, queue)) => queue.push_back(frame.to_vec()),
            None => {
                let mut queue = VecDeque::new();
                queue.push_back(frame.to_vec());
                state.incoming.push((channel, queue));
            }
        }
    }

    /// Everything handed down so far, in order.
    pub fn sent(&self) -> Vec<(RedChannelId, Vec<u8>)> {
        self.state.borrow().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }
}

impl LowerLayer for MockLowerLayer {
    fn send_message_payload(&mut self, channel: RedChannelId, payload: &[u8]) -> RastaResult<()> {
        self.state
            .borrow_mut()
            .sent
            .push((channel, payload.to_vec()));
        Ok(())
    }

    fn read_message(&mut self, channel: RedChannelId, buffer: &mut [u8]) -> RastaResult<usize> {
        let mut state = self.state.borrow_mut();
        let queue = match state.incoming.iter_mut().find(|(id, _)| *id == channel) {
            Some(queue) => queue,
            None => return Err(RastaError::NoMessageReceived),
        };
        match queue.1.pop_front() {
            Some(frame) => {
                buffer[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Err(RastaError::NoMessageReceived),
        }
    }
}

/// Platform double with a scripted clock and a record of fatal codes.
pub struct MockPlatform {
    now: Rc<Cell<u32>>,
    random: Rc<Cell<u32>>,
    fatal_codes: Rc<RefCell<Vec<RastaError>>>,
}

#[derive(Clone)]
pub struct PlatformHandle {
    now: Rc<Cell<u32>>,
    random: Rc<Cell<u32>>,
    fatal_codes: Rc<RefCell<Vec<RastaError>>>,
}

impl MockPlatform {
    pub fn new() -> (MockPlatform, PlatformHandle) {
        let now = Rc::new(Cell::new(0));
        let random = Rc::new(Cell::new(1000));
        let fatal_codes = Rc::new(RefCell::new(Vec::new()));
        (
            MockPlatform {
                now: now.clone(),
                random: random.clone(),
                fatal_codes: fatal_codes.clone(),
            },
            PlatformHandle {
                now,
                random,
                fatal_codes,
            },
        )
    }
}

impl PlatformHandle {
    pub fn set_time(&self, now_ms: u32) {
        self.now.set(now_ms);
    }

    pub fn advance_time(&self, delta_ms: u32) {
        self.now.set(self.now.get().wrapping_add(delta_ms));
    }

    pub fn set_next_random(&self, value: u32) {
        self.random.set(value);
    }

    pub fn fatal_codes(&self) -> Vec<RastaError> {
        self.fatal_codes.borrow().clone()
    }
}

impl Platform for MockPlatform {
    fn get_timer_value(&self) -> u32 {
        self.now.get()
    }

    fn get_timer_granularity(&self) -> u32 {
        1
    }

    fn get_random_number(&self) -> u32 {
        self.random.get()
    }

    fn fatal_error(&self, code: RastaError) {
        self.fatal_codes.borrow_mut().push(code);
    }
}

/// Notification double recording every callback.
pub struct SharedNotifications {
    state: Rc<RefCell<NotificationState>>,
}

#[derive(Default)]
pub struct NotificationState {
    received: Vec<ConnectionId>,
    states: Vec<(ConnectionId, SrState)>,
}

#[derive(Clone)]
pub struct NotificationsHandle {
    state: Rc<RefCell<NotificationState>>,
}

impl SharedNotifications {
    pub fn new() -> (SharedNotifications, NotificationsHandle) {
        let state = Rc::new(RefCell::new(NotificationState::default()));
        (
            SharedNotifications {
                state: state.clone(),
            },
            NotificationsHandle { state },
        )
    }
}

impl NotificationsHandle {
    pub fn received(&self) -> Vec<ConnectionId> {
        self.state.borrow().received.clone()
    }

    pub fn states(&self) -> Vec<(ConnectionId, SrState)> {
        self.state.borrow().states.clone()
    }

    pub fn last_state(&self, connection: ConnectionId) -> Option<SrState> {
        self.state
            .borrow()
            .states
            .iter()
            .rev()
            .find(|(id, _)| *id == connection)
            .map(|(_, state)| *state)
    }
}

impl SrNotifications for SharedNotifications {
    fn message_received_notification(&mut self, connection: ConnectionId) {
        self.state.borrow_mut().received.push(connection);
    }

    fn connection_state_notification(&mut self, connection: ConnectionId, state: SrState) {
        self.state.borrow_mut().states.push((connection, state));
    }
}
