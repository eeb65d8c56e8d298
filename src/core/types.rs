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

//! Shared scalar types and canonical encoding helpers used across the codec,
//! signer, and message modules.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// `serde`/`bincode` refused to serialize the value.
    #[error("serialization")]
    Serialize,
    /// Truncated input, unknown tag, or arity mismatch.
    #[error("malformed input")]
    Malformed,
    /// Input (or a declared container length inside it) exceeds the configured cap.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
///
/// Fixint encoding gives every integer a fixed width (no varint framing, whose
/// shortest-form ambiguity would break determinism); `reject_trailing_bytes`
/// turns leftover bytes after a valid value into a hard error instead of a
/// silent truncation.
fn bincode_opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering
/// (use `BTreeMap`/`BTreeSet`, never `HashMap`/`HashSet`).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts().serialize(v).map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap, rejecting truncated data, unknown enum
/// discriminants, and arity mismatches as [`CodecError::Malformed`].
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // Defensive cap inside the deserializer too, so a malicious declared
    // container length can't allocate past `max` before the outer check bites.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Malformed)
}

/// Default decode size cap for wire messages (16 MiB).
pub const DEFAULT_MAX_WIRE_BYTES: usize = 16 * 1024 * 1024;

/// Canonical map type alias — `BTreeMap` sorts keys on iteration, which is
/// required for byte-identical encoding of equal values.
pub type CanonicalMap<K, V> = BTreeMap<K, V>;

/// Peer index, `0..N`.
pub type PeerIndex = u32;

/// Monotonically increasing round number (`phase = round / 4`).
pub type Round = u64;

/// Phase number (`round / 4`); the phase's leader is `phase % N`.
pub type Phase = u64;

/// Block number in the chained sequence (`bno`).
pub type BlockNo = u64;

/// Session channel identifier; wire messages with a foreign channel id are dropped.
pub type ChannelId = String;
