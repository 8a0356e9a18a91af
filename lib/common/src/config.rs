//! Static configuration of both protocol layers.
//!
//! All values are fixed for the lifetime of the process. Structural validation
//! of the redundancy configuration lives with the redundancy diagnostics; the
//! range constants it checks against are defined here, next to the types.

use crate::crc::CheckCodeType;
use crate::md4::Md4InitValue;
use crate::shared::{RastaError, RastaResult};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// Configured redundancy channels per stack.
pub const RED_CHANNELS_MIN: usize = 1;
pub const RED_CHANNELS_MAX: usize = 2;

/// Transport channels multiplexed under one redundancy channel.
pub const TR_CHANNELS_PER_RED_MIN: usize = 1;
pub const TR_CHANNELS_PER_RED_MAX: usize = 2;

/// Defer queue timeout in milliseconds.
pub const T_SEQ_MIN: u32 = 50;
pub const T_SEQ_MAX: u32 = 500;

/// Diagnostic window size in messages.
pub const N_DIAGNOSIS_MIN: u32 = 10;
pub const N_DIAGNOSIS_MAX: u32 = 1000;

/// Defer queue capacity in messages.
pub const N_DEFER_QUEUE_SIZE_MIN: u32 = 4;
pub const N_DEFER_QUEUE_SIZE_MAX: u32 = 10;

/// Heartbeat period of the safety layer in milliseconds.
pub const T_H_MIN: u32 = 300;
pub const T_H_MAX: u32 = 750;

/// Maximum accepted message age of the safety layer in milliseconds.
pub const T_MAX_MIN: u32 = 750;
pub const T_MAX_MAX: u32 = 2000;

/// Configured safety layer connections per stack.
pub const CONNECTIONS_MIN: usize = 1;
pub const CONNECTIONS_MAX: usize = 2;

/// One redundancy channel and the transport channels it multiplexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyChannelConfig {
    pub red_channel_id: u32,
    pub transport_channel_ids: Vec<u32>,
}

/// Process lifetime configuration of the redundancy layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyConfig {
    pub check_code_type: CheckCodeType,
    pub t_seq: u32,
    pub n_diagnosis: u32,
    pub n_defer_queue_size: u32,
    pub redundancy_channels: Vec<RedundancyChannelConfig>,
}

impl RedundancyConfig {
    /// Loads the configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> RastaResult<RedundancyConfig> {
        serdeconv::from_toml_file(path).map_err(|_| RastaError::InvalidConfiguration)
    }
}

/// Safety code variants of the safety layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum SafetyCodeType {
    None,
    LowerMd4,
    FullMd4,
}

impl SafetyCodeType {
    /// Size of the encoded safety code in bytes.
    #[inline]
    pub fn code_len(self) -> usize {
        match self {
            SafetyCodeType::None => 0,
            SafetyCodeType::LowerMd4 => 8,
            SafetyCodeType::FullMd4 => 16,
        }
    }
}

/// One safety layer connection and its peer addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub connection_id: u32,
    pub sender_id: u32,
    pub receiver_id: u32,
}

/// Process lifetime configuration of the safety layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub safety_code_type: SafetyCodeType,
    pub md4_initial_value: Md4InitValue,
    pub t_h: u32,
    pub t_max: u32,
    pub connections: Vec<ConnectionConfig>,
}

impl SafetyConfig {
    /// Loads the configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> RastaResult<SafetyConfig> {
        serdeconv::from_toml_file(path).map_err(|_| RastaError::InvalidConfiguration)
    }

    /// Checks every field against its configured range and connection id
    /// contiguity.
    pub fn is_valid(&self) -> bool {
        if self.t_h < T_H_MIN || self.t_h > T_H_MAX {
            return false;
        }

        if self.t_max < T_MAX_MIN || self.t_max > T_MAX_MAX {
            return false;
        }

        // The heartbeat period must leave room for at least one heartbeat
        // before the peer gives up on the connection.
        if self.t_h >= self.t_max {
            return false;
        }

        if self.connections.len() < CONNECTIONS_MIN || self.connections.len() > CONNECTIONS_MAX {
            return false;
        }

        for (index, connection) in self.connections.iter().enumerate() {
            if connection.connection_id != index as u32 {
                return false;
            }

            if connection.sender_id == connection.receiver_id {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn safety_config() -> SafetyConfig {
        SafetyConfig {
            safety_code_type: SafetyCodeType::FullMd4,
            md4_initial_value: Md4InitValue::RFC1320,
            t_h: 300,
            t_max: 2000,
            connections: vec![ConnectionConfig {
                connection_id: 0,
                sender_id: 0x61,
                receiver_id: 0x62,
            }],
        }
    }

    #[test]
    fn test_safety_config_valid() {
        assert!(safety_config().is_valid());
    }

    #[test]
    fn test_safety_config_timer_ranges() {
        let mut config = safety_config();
        config.t_h = T_H_MIN - 1;
        assert!(!config.is_valid());

        let mut config = safety_config();
        config.t_h = T_H_MAX + 1;
        assert!(!config.is_valid());

        let mut config = safety_config();
        config.t_max = T_MAX_MIN - 1;
        assert!(!config.is_valid());

        let mut config = safety_config();
        config.t_max = T_MAX_MAX + 1;
        assert!(!config.is_valid());
    }

    #[test]
    fn test_safety_config_heartbeat_must_undershoot_timeout() {
        let mut config = safety_config();
        config.t_h = 750;
        config.t_max = 750;
        assert!(!config.is_valid());
    }

    #[test]
    fn test_safety_config_connection_ids_contiguous() {
        let mut config = safety_config();
        config.connections[0].connection_id = 1;
        assert!(!config.is_valid());
    }

    #[test]
    fn test_safety_config_sender_receiver_distinct() {
        let mut config = safety_config();
        config.connections[0].receiver_id = config.connections[0].sender_id;
        assert!(!config.is_valid());
    }

    #[test]
    fn test_safety_config_connection_count() {
        let mut config = safety_config();
        config.connections.clear();
        assert!(!config.is_valid());

        let mut config = safety_config();
        for index in 1..3 {
            config.connections.push(ConnectionConfig {
                connection_id: index,
                sender_id: 0x61 + index,
                receiver_id: 0x71 + index,
            });
        }
        assert!(!config.is_valid());
    }

    #[test]
    fn test_redundancy_config_toml_roundtrip() {
        let toml = r#"
check_code_type = "B"
t_seq = 50
n_diagnosis = 10
n_defer_queue_size = 4

[[redundancy_channels]]
red_channel_id = 0
transport_channel_ids = [0, 1]
"#;

        let mut file = tempfile_path("rasta-red-config");
        file.1.write_all(toml.as_bytes()).unwrap();

        let config = RedundancyConfig::from_toml_file(&file.0).unwrap();
        assert_eq!(config.check_code_type, CheckCodeType::B);
        assert_eq!(config.t_seq, 50);
        assert_eq!(config.n_diagnosis, 10);
        assert_eq!(config.n_defer_queue_size, 4);
        assert_eq!(config.redundancy_channels.len(), 1);
        assert_eq!(config.redundancy_channels[0].transport_channel_ids, vec![0, 1]);

        std::fs::remove_file(&file.0).unwrap();
    }

    #[test]
    fn test_safety_config_toml_roundtrip() {
        let toml = r#"
safety_code_type = "FullMd4"
t_h = 300
t_max = 1800

[md4_initial_value]
init_a = 1732584193
init_b = 4023233417
init_c = 2562383102
init_d = 271733878

[[connections]]
connection_id = 0
sender_id = 97
receiver_id = 98
"#;

        let mut file = tempfile_path("rasta-sr-config");
        file.1.write_all(toml.as_bytes()).unwrap();

        let config = SafetyConfig::from_toml_file(&file.0).unwrap();
        assert_eq!(config.safety_code_type, SafetyCodeType::FullMd4);
        assert_eq!(config.md4_initial_value, Md4InitValue::RFC1320);
        assert!(config.is_valid());

        std::fs::remove_file(&file.0).unwrap();
    }

    #[test]
    fn test_config_load_failure_is_invalid_configuration() {
        let result = RedundancyConfig::from_toml_file("/nonexistent/rasta.toml");
        assert_eq!(result.err().unwrap(), RastaError::InvalidConfiguration);
    }

    fn tempfile_path(prefix: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "{}-{}.toml",
            prefix,
            std::process::id()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
