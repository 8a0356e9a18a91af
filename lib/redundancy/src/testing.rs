//! Hand rolled test doubles for the layer's collaborators.

use crate::{DiagnosticData, RedNotifications, Transport};
use rasta_common::platform::Platform;
use rasta_common::shared::RastaError;
use rasta_common::{RedChannelId, TransportChannelId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Transport double with scripted incoming frames and a record of everything
/// sent. The shared handle stays with the test while the mock itself moves
/// into the layer.
pub struct MockTransport {
    state: Rc<RefCell<TransportState>>,
}

#[derive(Default)]
pub struct TransportState {
    sent: Vec<(TransportChannelId, Vec<u8>)>,
    incoming: Vec<(TransportChannelId, VecDeque<Vec<u8>>)>,
}

#[derive(Clone)]
pub struct TransportHandle {
    state: Rc<RefCell<TransportState>>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, TransportHandle) {
        let state = Rc::new(RefCell::new(TransportState::default()));
        (
            MockTransport {
                state: state.clone(),
            },
            TransportHandle { state },
        )
    }
}

impl TransportHandle {
    /// Queues a frame for the next read on the given transport channel.
    pub fn push_incoming(&self, channel: TransportChannelId, frame: &[u8]) {
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

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(TransportChannelId, Vec<u8>)> {
        self.state.borrow().sent.clone()
    }

    /// Number of frames still queued for reading on a channel.
    pub fn pending_incoming(&self, channel: TransportChannelId) -> usize {
        self.state
            .borrow()
            .incoming
            .iter()
            .find(|(id, _)| *id == channel)
            .map(|(_, queue)| queue.len())
            .unwrap_or(0)
    }

    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }
}

impl Transport for MockTransport {
    fn send_message(&mut self, channel: TransportChannelId, data: &[u8]) {
        self.state.borrow_mut().sent.push((channel, data.to_vec()));
    }

    fn read_message(&mut self, channel: TransportChannelId, buffer: &mut [u8]) -> Option<usize> {
        let mut state = self.state.borrow_mut();
        let queue = state.incoming.iter_mut().find(|(id, _)| *id == channel)?;
        let frame = queue.1.pop_front()?;
        buffer[..frame.len()].copy_from_slice(&frame);
        Some(frame.len())
    }
}

/// Platform double with a scripted clock and a record of fatal codes. Unlike
/// a production adapter it returns from the trap so tests can assert on the
/// propagated error.
pub struct MockPlatform {
    now: Rc<Cell<u32>>,
    fatal_codes: Rc<RefCell<Vec<RastaError>>>,
}

#[derive(Clone)]
pub struct PlatformHandle {
    now: Rc<Cell<u32>>,
    fatal_codes: Rc<RefCell<Vec<RastaError>>>,
}

impl MockPlatform {
    pub fn new() -> (MockPlatform, PlatformHandle) {
        let now = Rc::new(Cell::new(0));
        let fatal_codes = Rc::new(RefCell::new(Vec::new()));
        (
            MockPlatform {
                now: now.clone(),
                fatal_codes: fatal_codes.clone(),
            },
            PlatformHandle { now, fatal_codes },
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
        4
    }

    fn fatal_error(&self, code: RastaError) {
        self.fatal_codes.borrow_mut().push(code);
    }
}

/// Notification double recording every callback.
pub struct RecordingNotifications {
    received: Vec<RedChannelId>,
    diagnostics: Vec<(RedChannelId, TransportChannelId, DiagnosticData)>,
}

impl RecordingNotifications {
    pub fn new() -> RecordingNotifications {
        RecordingNotifications {
            received: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn received(&self) -> &[RedChannelId] {
        &self.received
    }

    pub fn diagnostics(&self) -> &[(RedChannelId, TransportChannelId, DiagnosticData)] {
        &self.diagnostics
    }
}

impl RedNotifications for RecordingNotifications {
    fn message_received_notification(&mut self, channel: RedChannelId) {
        self.received.push(channel);
    }

    fn diagnostic_notification(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
        data: DiagnosticData,
    ) {
        self.diagnostics.push((channel, transport_channel, data));
    }
}

/// Notification double that can be cloned into the layer while the test keeps
/// a handle on the recorded calls.
pub struct SharedNotifications {
    state: Rc<RefCell<RecordingNotifications>>,
}

#[derive(Clone)]
pub struct NotificationsHandle {
    state: Rc<RefCell<RecordingNotifications>>,
}

impl SharedNotifications {
    pub fn new() -> (SharedNotifications, NotificationsHandle) {
        let state = Rc::new(RefCell::new(RecordingNotifications::new()));
        (
            SharedNotifications {
                state: state.clone(),
            },
            NotificationsHandle { state },
        )
    }
}

impl NotificationsHandle {
    pub fn received(&self) -> Vec<RedChannelId> {
        self.state.borrow().received.clone()
    }

    pub fn diagnostics(&self) -> Vec<(RedChannelId, TransportChannelId, DiagnosticData)> {
        self.state.borrow().diagnostics.clone()
    }
}

impl RedNotifications for SharedNotifications {
    fn message_received_notification(&mut self, channel: RedChannelId) {
        self.state.borrow_mut().message_received_notification(channel);
    }

    fn diagnostic_notification(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
        data: DiagnosticData,
    ) {
        self.state
            .borrow_mut()
            .diagnostic_notification(channel, transport_channel, data);
    }
}
