// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Session configuration, loaded from TOML at startup.

use crate::core::types::{ChannelId, PeerIndex, Round};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("io")]
    Io,
    /// The file's contents did not parse as valid configuration.
    #[error("parse: {0}")]
    Parse(String),
    /// `session.addrs` and `session.pubs_hex` had different lengths.
    #[error("addrs and pubs_hex must have the same length")]
    AddrsPubsMismatch,
    /// A `pubs_hex` entry was not valid hex.
    #[error("invalid hex in pubs_hex")]
    InvalidHex,
    /// `session.my_id` was not `< addrs.len()`.
    #[error("my_id {my_id} out of range for {n} peers")]
    MyIdOutOfRange {
        /// The configured peer index.
        my_id: PeerIndex,
        /// The number of configured peers.
        n: usize,
    },
}

/// The fixed peer set and identity for one consensus session. The set is
/// immutable for the session's lifetime; reconfiguration requires a new
/// session (no dynamic membership changes mid-session).
#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    /// This node's index into `addrs`/`pubs_hex`.
    pub my_id: PeerIndex,
    /// Every peer's network address, in index order.
    pub addrs: Vec<String>,
    /// Every peer's public key, hex-encoded, in index order.
    pub pubs_hex: Vec<String>,
    /// Session/channel identifier; wire messages for a different channel are dropped.
    pub channel_id: ChannelId,
    /// The round to start the first block's state machine at.
    #[serde(default)]
    pub start_round: Round,
}

/// Checkpoint sink locations.
#[derive(Clone, Debug, Deserialize)]
pub struct BackupConfig {
    /// Paths of the redundant checkpoint files; recovery votes by highest round among them.
    pub paths: Vec<PathBuf>,
}

/// Optional Prometheus exporter wiring.
#[derive(Clone, Debug, Deserialize)]
pub struct MetricsConfig {
    /// Address the metrics HTTP endpoint listens on, e.g. `0.0.0.0:9100`.
    pub listen_addr: Option<String>,
}

/// Top-level node configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeConfig {
    /// Peer-set and identity configuration.
    pub session: SessionConfig,
    /// Checkpoint sink configuration.
    pub backup: BackupConfig,
    /// Metrics exporter configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { listen_addr: None }
    }
}

impl NodeConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::Io)?;
        Self::parse(&text)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let cfg: NodeConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.addrs.len() != self.session.pubs_hex.len() {
            return Err(ConfigError::AddrsPubsMismatch);
        }
        if self.session.my_id as usize >= self.session.addrs.len() {
            return Err(ConfigError::MyIdOutOfRange {
                my_id: self.session.my_id,
                n: self.session.addrs.len(),
            });
        }
        for h in &self.session.pubs_hex {
            hex::decode(h).map_err(|_| ConfigError::InvalidHex)?;
        }
        Ok(())
    }

    /// Decoded public key bytes, in peer index order.
    pub fn pubs(&self) -> Result<Vec<Vec<u8>>, ConfigError> {
        self.session
            .pubs_hex
            .iter()
            .map(|h| hex::decode(h).map_err(|_| ConfigError::InvalidHex))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [session]
        my_id = 0
        addrs = ["127.0.0.1:9001", "127.0.0.1:9002", "127.0.0.1:9003", "127.0.0.1:9004"]
        pubs_hex = ["aa", "bb", "cc", "dd"]
        channel_id = "demo-channel"

        [backup]
        paths = ["./data/node0.chk", "./data/node0.chk.bak"]

        [metrics]
        listen_addr = "0.0.0.0:9100"
    "#;

    #[test]
    fn parses_well_formed_config() {
        let cfg = NodeConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.session.my_id, 0);
        assert_eq!(cfg.session.addrs.len(), 4);
        assert_eq!(cfg.pubs().unwrap()[1], vec![0xbb]);
    }

    #[test]
    fn rejects_my_id_out_of_range() {
        let bad = SAMPLE.replace("my_id = 0", "my_id = 9");
        assert!(matches!(
            NodeConfig::parse(&bad),
            Err(ConfigError::MyIdOutOfRange { my_id: 9, n: 4 })
        ));
    }

    #[test]
    fn rejects_mismatched_addrs_and_pubs() {
        let bad = SAMPLE.replace(r#"pubs_hex = ["aa", "bb", "cc", "dd"]"#, r#"pubs_hex = ["aa"]"#);
        assert!(matches!(
            NodeConfig::parse(&bad),
            Err(ConfigError::AddrsPubsMismatch)
        ));
    }
}
