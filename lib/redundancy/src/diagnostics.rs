//! Configuration validation and per transport channel diagnostics.
//!
//! Every redundancy channel keeps a sliding window of `n_diagnosis` distinct
//! sequence numbers. Within one window the layer counts, per transport
//! channel, how many of those messages arrived on it and accumulates the
//! delay of duplicate arrivals relative to the first copy. When the window
//! closes the counters are published through the notification adapter and
//! reset.

use crate::RedNotifications;
use rasta_common::config::{
    RedundancyConfig, N_DEFER_QUEUE_SIZE_MAX, N_DEFER_QUEUE_SIZE_MIN, N_DIAGNOSIS_MAX,
    N_DIAGNOSIS_MIN, RED_CHANNELS_MAX, RED_CHANNELS_MIN, TR_CHANNELS_PER_RED_MAX,
    TR_CHANNELS_PER_RED_MIN, T_SEQ_MAX, T_SEQ_MIN,
};
use rasta_common::logging;
use rasta_common::{RedChannelId, TransportChannelId};

/// Number of recently seen sequence numbers remembered for duplicate drift
/// measurement. Duplicates spread at most across the defer window, so twice
/// the maximal defer queue depth is plenty.
const RECENT_SEQUENCES: usize = 2 * N_DEFER_QUEUE_SIZE_MAX as usize;

/// Diagnostic counters for one transport channel over one closed window.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DiagnosticData {
    /// Size of the window in messages.
    pub n_diagnosis: u32,
    /// Messages of the window that never arrived on this transport channel.
    pub n_missed: u32,
    /// Accumulated delay of this channel's copies against the first arrival,
    /// in milliseconds.
    pub t_drift: u32,
    /// Accumulated squared delay, in milliseconds squared.
    pub t_drift2: u32,
}

/// Checks every configured value against its range, transport channel id
/// uniqueness across the whole configuration and redundancy channel id
/// contiguity.
pub fn validate_configuration(config: &RedundancyConfig) -> bool {
    if config.t_seq < T_SEQ_MIN || config.t_seq > T_SEQ_MAX {
        return false;
    }

    if config.n_diagnosis < N_DIAGNOSIS_MIN || config.n_diagnosis > N_DIAGNOSIS_MAX {
        return false;
    }

    if config.n_defer_queue_size < N_DEFER_QUEUE_SIZE_MIN
        || config.n_defer_queue_size > N_DEFER_QUEUE_SIZE_MAX
    {
        return false;
    }

    let channels = &config.redundancy_channels;
    if channels.len() < RED_CHANNELS_MIN || channels.len() > RED_CHANNELS_MAX {
        return false;
    }

    let mut seen_transport_ids: Vec<u32> = Vec::new();
    for (index, channel) in channels.iter().enumerate() {
        if channel.red_channel_id != index as u32 {
            return false;
        }

        let transports = &channel.transport_channel_ids;
        if transports.len() < TR_CHANNELS_PER_RED_MIN || transports.len() > TR_CHANNELS_PER_RED_MAX
        {
            return false;
        }

        for &transport_id in transports {
            if seen_transport_ids.contains(&transport_id) {
                return false;
            }
            seen_transport_ids.push(transport_id);
        }
    }

    true
}

struct RecentSequence {
    valid: bool,
    sequence_number: u32,
    first_arrival_ms: u32,
    seen: [bool; TR_CHANNELS_PER_RED_MAX],
}

struct TransportCounters {
    received: u32,
    t_drift: u32,
    t_drift2: u32,
}

struct ChannelDiagnostics {
    transport_channel_ids: Vec<TransportChannelId>,
    window_count: u32,
    recent: Vec<RecentSequence>,
    recent_next: usize,
    transports: Vec<TransportCounters>,
}

impl ChannelDiagnostics {
    fn new(transport_channel_ids: Vec<TransportChannelId>) -> ChannelDiagnostics {
        let transports = transport_channel_ids
            .iter()
            .map(|_| TransportCounters {
                received: 0,
                t_drift: 0,
                t_drift2: 0,
            })
            .collect();

        let recent = (0..RECENT_SEQUENCES)
            .map(|_| RecentSequence {
                valid: false,
                sequence_number: 0,
                first_arrival_ms: 0,
                seen: [false; TR_CHANNELS_PER_RED_MAX],
            })
            .collect();

        ChannelDiagnostics {
            transport_channel_ids,
            window_count: 0,
            recent,
            recent_next: 0,
            transports,
        }
    }

    fn reset(&mut self) {
        self.window_count = 0;
        self.recent_next = 0;
        for entry in &mut self.recent {
            entry.valid = false;
        }
        for counters in &mut self.transports {
            counters.received = 0;
            counters.t_drift = 0;
            counters.t_drift2 = 0;
        }
    }
}

/// Diagnostics state for every configured redundancy channel.
pub struct RedDiagnostics {
    n_diagnosis: u32,
    channels: Vec<ChannelDiagnostics>,
    log: logging::Logger,
}

impl RedDiagnostics {
    pub fn new(config: &RedundancyConfig, log: &logging::Logger) -> RedDiagnostics {
        let channels = config
            .redundancy_channels
            .iter()
            .map(|channel| ChannelDiagnostics::new(channel.transport_channel_ids.clone()))
            .collect();

        RedDiagnostics {
            n_diagnosis: config.n_diagnosis,
            channels,
            log: log.new(logging::o!()),
        }
    }

    /// Resets the window of one channel.
    pub fn init_channel(&mut self, channel: RedChannelId) {
        if let Some(diagnostics) = self.channels.get_mut(channel as usize) {
            diagnostics.reset();
        }
    }

    /// True iff the transport channel belongs to the redundancy channel.
    pub fn is_transport_channel_id_valid(
        &self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
    ) -> bool {
        match self.channels.get(channel as usize) {
            Some(diagnostics) => diagnostics
                .transport_channel_ids
                .contains(&transport_channel),
            None => false,
        }
    }

    /// Records the arrival of `sequence_number` on `transport_channel`. When
    /// this closes the window, counters are published and reset.
    pub fn update_channel<N: RedNotifications>(
        &mut self,
        channel: RedChannelId,
        transport_channel: TransportChannelId,
        sequence_number: u32,
        now_ms: u32,
        notifications: &mut N,
    ) {
        let diagnostics = match self.channels.get_mut(channel as usize) {
            Some(diagnostics) => diagnostics,
            None => return,
        };

        let transport_index = match diagnostics
            .transport_channel_ids
            .iter()
            .position(|&id| id == transport_channel)
        {
            Some(index) => index,
            None => return,
        };

        match diagnostics
            .recent
            .iter_mut()
            .find(|entry| entry.valid && entry.sequence_number == sequence_number)
        {
            Some(entry) => {
                // A duplicate of a message already counted in this window.
                if entry.seen[transport_index] {
                    return;
                }
                entry.seen[transport_index] = true;

                let drift = now_ms.wrapping_sub(entry.first_arrival_ms);
                let counters = &mut diagnostics.transports[transport_index];
                counters.received += 1;
                counters.t_drift = counters.t_drift.wrapping_add(drift);
                counters.t_drift2 = counters.t_drift2.wrapping_add(drift.wrapping_mul(drift));
            }
            None => {
                let index = diagnostics.recent_next;
                diagnostics.recent_next = (index + 1) % diagnostics.recent.len();

                let entry = &mut diagnostics.recent[index];
                entry.valid = true;
                entry.sequence_number = sequence_number;
                entry.first_arrival_ms = now_ms;
                entry.seen = [false; TR_CHANNELS_PER_RED_MAX];
                entry.seen[transport_index] = true;

                diagnostics.transports[transport_index].received += 1;
                diagnostics.window_count += 1;

                if diagnostics.window_count >= self.n_diagnosis {
                    logging::debug!(self.log, "diagnostic window closed";
                                    "channel" => channel,
                                    "n_diagnosis" => self.n_diagnosis);

                    for (index, counters) in diagnostics.transports.iter().enumerate() {
                        notifications.diagnostic_notification(
                            channel,
                            diagnostics.transport_channel_ids[index],
                            DiagnosticData {
                                n_diagnosis: self.n_diagnosis,
                                n_missed: self.n_diagnosis - counters.received,
                                t_drift: counters.t_drift,
                                t_drift2: counters.t_drift2,
                            },
                        );
                    }

                    diagnostics.reset();
                }
            }
        }
    }
}
