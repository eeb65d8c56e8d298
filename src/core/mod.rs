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

//! Core protocol primitives: canonical types, the message algebras, signing,
//! the DLS consensus engine, and the sequence ledger it feeds.

/// Session configuration, deserializable from TOML.
pub mod config;
/// The consensus engine: state machine, checkpointing, and the peer driver.
pub mod consensus;
/// The chained sequence ledger built on top of per-block decisions.
pub mod ledger;
/// Internal and wire message algebras.
pub mod message;
/// Pluggable message authenticators.
pub mod signer;
/// Shared scalar types and canonical encoding helpers.
pub mod types;
