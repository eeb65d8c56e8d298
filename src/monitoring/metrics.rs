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

//! Prometheus metrics for the consensus node: round/phase progress, decisions
//! reached, durable-checkpoint health, and dropped-message counts broken down
//! by the reason they were dropped.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registering or constructing a Prometheus collector failed.
    #[error("prometheus")]
    Prom,
}

/// Metrics container, wired into a single [`Registry`] exposed over HTTP.
#[derive(Clone)]
pub struct Metrics {
    /// Registry every collector below is registered into.
    pub registry: Registry,

    /// Current round of the active block's state machine.
    pub round: IntGauge,
    /// Current block number being assembled.
    pub block_height: IntGauge,
    /// Total items committed across every decided block.
    pub items_committed_total: IntCounter,
    /// Total blocks decided.
    pub decisions_total: IntCounter,

    /// Wire messages dropped, labeled by `reason` (`bad_signature`,
    /// `foreign_channel`, `sender_out_of_range`, `bad_evidence`).
    pub messages_dropped_total: IntCounterVec,
    /// Checkpoint persist attempts, labeled by `outcome` (`ok`, `failed`).
    pub checkpoint_persists_total: IntCounterVec,
    /// Checkpoint recoveries performed at startup.
    pub checkpoint_recoveries_total: IntCounter,
}

impl Metrics {
    /// Create and register every collector.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let round = IntGauge::new("dlschain_round", "Current DLS round of the active block")
            .map_err(|_| MetricsError::Prom)?;
        let block_height = IntGauge::new("dlschain_block_height", "Current block number")
            .map_err(|_| MetricsError::Prom)?;
        let items_committed_total = IntCounter::new(
            "dlschain_items_committed_total",
            "Total items committed across all decided blocks",
        )
        .map_err(|_| MetricsError::Prom)?;
        let decisions_total = IntCounter::new("dlschain_decisions_total", "Total blocks decided")
            .map_err(|_| MetricsError::Prom)?;

        let messages_dropped_total = IntCounterVec::new(
            Opts::new(
                "dlschain_messages_dropped_total",
                "Wire messages dropped before reaching the state machine",
            ),
            &["reason"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let checkpoint_persists_total = IntCounterVec::new(
            Opts::new(
                "dlschain_checkpoint_persists_total",
                "Checkpoint persist attempts",
            ),
            &["outcome"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let checkpoint_recoveries_total = IntCounter::new(
            "dlschain_checkpoint_recoveries_total",
            "Checkpoint recoveries performed at startup",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(round.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(block_height.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(items_committed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(decisions_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(checkpoint_persists_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(checkpoint_recoveries_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            round,
            block_height,
            items_committed_total,
            decisions_total,
            messages_dropped_total,
            checkpoint_persists_total,
            checkpoint_recoveries_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_registers_every_collector() {
        let m = Metrics::new().unwrap();
        assert!(!m.registry.gather().is_empty());
    }

    #[test]
    fn dropped_reason_labels_are_independent() {
        let m = Metrics::new().unwrap();
        m.messages_dropped_total
            .with_label_values(&["bad_signature"])
            .inc();
        m.messages_dropped_total
            .with_label_values(&["foreign_channel"])
            .inc_by(2);
        assert_eq!(m.messages_dropped_total.with_label_values(&["bad_signature"]).get(), 1);
        assert_eq!(m.messages_dropped_total.with_label_values(&["foreign_channel"]).get(), 2);
    }
}
