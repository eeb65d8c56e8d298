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

//! `dlschain` - a chained Dwork-Lynch-Stockmeyer Byzantine consensus engine.
//!
//! This crate provides:
//! - A per-block DLS state machine tolerant of `f = (n-1)/3` Byzantine peers
//! - A peer driver chaining decided blocks into one total-ordered item sequence
//! - Pluggable message signing, from an insecure placeholder to Ed25519
//! - Durable, multi-sink checkpointing with truncated-digest framing
//! - Monitoring via Prometheus metrics and structured JSON logging

/// Core protocol primitives: types, the consensus engine, the sequence
/// ledger, message algebras, signing, and configuration.
pub mod core;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// The pluggable send boundary consensus messages are handed to.
pub mod transport;
