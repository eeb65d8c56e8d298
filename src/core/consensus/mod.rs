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

//! The Dwork-Lynch-Stockmeyer consensus engine: the per-block state machine,
//! its durable checkpointing, and the peer driver that chains blocks into a
//! total order and handles wire-level authentication and routing.

/// Durable checkpoint/recovery of state machine snapshots.
pub mod checkpoint;
/// The per-block DLS state machine.
pub mod dls;
/// The peer driver: signing, decoding, routing, and block chaining.
pub mod driver;
