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

//! The transport boundary. Real transport selection (libp2p, QUIC, a plain
//! TCP framing) is left to the integrator; this crate only needs somewhere
//! to hand already-encoded bytes addressed to a peer. [`LoopbackTransport`]
//! is provided for tests and the in-process demo binary.

use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination address is not known to this transport.
    #[error("unknown destination: {0}")]
    UnknownDestination(String),
}

/// A minimal send boundary: hand framed bytes to a peer address. Delivery
/// ordering, retries, and backpressure are the implementation's concern, not
/// the consensus engine's.
pub trait Transport: Send + Sync {
    /// Send `bytes` to `addr`. Errors are for local dispatch problems only
    /// (e.g. no route); the protocol already tolerates lost or reordered
    /// messages, so implementations should not retry indefinitely here.
    fn send(&self, addr: &str, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// An in-process transport for tests and the demo binary: every address is a
/// named queue, and delivery just appends to it.
#[derive(Default)]
pub struct LoopbackTransport {
    queues: Mutex<std::collections::HashMap<String, VecDeque<Vec<u8>>>>,
}

impl LoopbackTransport {
    /// An empty loopback transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr` so it has a queue to deliver into (sends to
    /// unregistered addresses fail).
    pub fn register(&self, addr: &str) {
        self.queues
            .lock()
            .expect("loopback transport mutex poisoned")
            .entry(addr.to_string())
            .or_default();
    }

    /// Drain every message queued for `addr`, in delivery order.
    pub fn drain(&self, addr: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .expect("loopback transport mutex poisoned")
            .get_mut(addr)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, addr: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().expect("loopback transport mutex poisoned");
        match queues.get_mut(addr) {
            Some(q) => {
                q.push_back(bytes);
                Ok(())
            }
            None => Err(TransportError::UnknownDestination(addr.to_string())),
        }
    }
}
