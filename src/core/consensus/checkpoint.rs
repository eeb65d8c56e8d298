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

//! Durable checkpointing of [`crate::core::consensus::dls::DlsSnapshot`].
//!
//! Every checkpoint is framed as `packed_tuple ‖ trunc16(SHA-256(packed_tuple))`
//! across one or more independent sinks, so recovery can vote on which copy
//! is both intact and furthest ahead. Writes go to a temp file and are
//! renamed into place, the same durability shape the keystore uses for
//! private key material.

use crate::core::message::ConsensusItem;
use crate::core::consensus::dls::DlsSnapshot;
use crate::core::types::{decode_canonical_limited, encode_canonical, CodecError, DEFAULT_MAX_WIRE_BYTES};
use ring::digest::{digest, SHA256};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

const DIGEST_TRUNC_LEN: usize = 16;

/// Checkpointing errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying codec failure.
    #[error("codec")]
    Codec(#[from] CodecError),
    /// A filesystem operation failed.
    #[error("io")]
    Io,
    /// The stored digest did not match the stored payload.
    #[error("digest mismatch")]
    DigestMismatch,
    /// Every configured sink failed to produce a usable snapshot.
    #[error("all checkpoint sinks failed")]
    AllSinksFailed,
    /// `recover(just_check = true)` found the in-memory state diverged from
    /// the recovered snapshot.
    #[error("recovered state does not match in-memory state")]
    RecoveryMismatch,
}

fn frame(bindata: &[u8]) -> Vec<u8> {
    let h = digest(&SHA256, bindata);
    let mut out = Vec::with_capacity(bindata.len() + DIGEST_TRUNC_LEN);
    out.extend_from_slice(bindata);
    out.extend_from_slice(&h.as_ref()[..DIGEST_TRUNC_LEN]);
    out
}

fn unframe(raw: &[u8]) -> Result<&[u8], CheckpointError> {
    if raw.len() < DIGEST_TRUNC_LEN {
        return Err(CheckpointError::DigestMismatch);
    }
    let (bindata, tail) = raw.split_at(raw.len() - DIGEST_TRUNC_LEN);
    let h = digest(&SHA256, bindata);
    if &h.as_ref()[..DIGEST_TRUNC_LEN] != tail {
        return Err(CheckpointError::DigestMismatch);
    }
    Ok(bindata)
}

/// A single durable store for one peer's checkpoint. Implementations need
/// not be atomic internally - [`write`](CheckpointSink::write) is the unit of
/// durability the caller relies on.
pub trait CheckpointSink: Send + Sync {
    /// Persist `bytes` (already framed), replacing any prior contents.
    fn write(&self, bytes: &[u8]) -> Result<(), CheckpointError>;
    /// Read back whatever is currently stored, or `None` if nothing has been
    /// written yet.
    fn read(&self) -> Result<Option<Vec<u8>>, CheckpointError>;
}

/// File-backed sink: writes to `path.tmp`, fsyncs, then renames over `path`.
pub struct FileCheckpointSink {
    path: PathBuf,
}

impl FileCheckpointSink {
    /// Checkpoint to `path`. The parent directory must already exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointSink for FileCheckpointSink {
    fn write(&self, bytes: &[u8]) -> Result<(), CheckpointError> {
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        {
            use std::io::Write;
            let mut f = fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp)
                .map_err(|_| CheckpointError::Io)?;
            f.write_all(bytes).map_err(|_| CheckpointError::Io)?;
            f.sync_all().map_err(|_| CheckpointError::Io)?;
        }
        fs::rename(&tmp, &self.path).map_err(|_| CheckpointError::Io)?;
        Ok(())
    }

    fn read(&self) -> Result<Option<Vec<u8>>, CheckpointError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(_) => Err(CheckpointError::Io),
        }
    }
}

/// Drives a `DlsSnapshot` to and from a set of redundant sinks.
pub struct Checkpointer<I: ConsensusItem> {
    sinks: Vec<Box<dyn CheckpointSink>>,
    _marker: std::marker::PhantomData<I>,
}

impl<I: ConsensusItem> Checkpointer<I> {
    /// Build from a non-empty list of sinks.
    pub fn new(sinks: Vec<Box<dyn CheckpointSink>>) -> Self {
        Self {
            sinks,
            _marker: std::marker::PhantomData,
        }
    }

    /// Serialize, frame, and write `snapshot` to every sink. Returns an error
    /// only if every sink failed; partial failure is tolerated since recovery
    /// votes across sinks.
    pub fn persist(&self, snapshot: &DlsSnapshot<I>) -> Result<(), CheckpointError> {
        let bindata = encode_canonical(snapshot)?;
        let framed = frame(&bindata);

        let mut any_ok = false;
        for sink in &self.sinks {
            if sink.write(&framed).is_ok() {
                any_ok = true;
            }
        }
        if any_ok {
            Ok(())
        } else {
            Err(CheckpointError::Io)
        }
    }

    /// Read every sink, keep the ones with an intact digest, and return the
    /// snapshot with the highest `round` among them (the reference
    /// implementation's "take the higher round backup" rule).
    pub fn recover(&self) -> Result<DlsSnapshot<I>, CheckpointError> {
        let mut candidates: Vec<DlsSnapshot<I>> = Vec::new();
        for sink in &self.sinks {
            let Ok(Some(raw)) = sink.read() else { continue };
            let Ok(bindata) = unframe(&raw) else { continue };
            let Ok(snapshot) = decode_canonical_limited::<DlsSnapshot<I>>(bindata, DEFAULT_MAX_WIRE_BYTES)
            else {
                continue;
            };
            candidates.push(snapshot);
        }

        candidates
            .into_iter()
            .max_by_key(|s| s.round)
            .ok_or(CheckpointError::AllSinksFailed)
    }

    /// Recover without mutating anything, and confirm the recovered snapshot
    /// exactly matches `current` - used to validate that every sink agrees
    /// with in-memory state without committing a restore.
    pub fn check(&self, current: &DlsSnapshot<I>) -> Result<(), CheckpointError> {
        let recovered = self.recover()?;
        if &recovered == current {
            Ok(())
        } else {
            Err(CheckpointError::RecoveryMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consensus::dls::DlsStateMachine;
    use crate::core::consensus::dls::IdentityPackager;
    use tempfile::tempdir;

    #[test]
    fn persist_and_recover_round_trip() {
        let dir = tempdir().unwrap();
        let sinks: Vec<Box<dyn CheckpointSink>> = vec![
            Box::new(FileCheckpointSink::new(dir.path().join("a.chk"))),
            Box::new(FileCheckpointSink::new(dir.path().join("b.chk"))),
        ];
        let checkpointer: Checkpointer<String> = Checkpointer::new(sinks);

        let machine = DlsStateMachine::new(0, "hello0".to_string(), 4, 3, Box::new(IdentityPackager));
        let snapshot = machine.snapshot();

        checkpointer.persist(&snapshot).unwrap();
        let recovered = checkpointer.recover().unwrap();
        assert_eq!(recovered, snapshot);
        checkpointer.check(&snapshot).unwrap();
    }

    #[test]
    fn recover_prefers_highest_round_when_sinks_disagree() {
        let dir = tempdir().unwrap();
        let sink_a = FileCheckpointSink::new(dir.path().join("a.chk"));
        let sink_b = FileCheckpointSink::new(dir.path().join("b.chk"));

        let mut old_machine = DlsStateMachine::new(0, "v".to_string(), 4, 3, Box::new(IdentityPackager));
        let old_snapshot = old_machine.snapshot();
        let bindata = encode_canonical(&old_snapshot).unwrap();
        sink_a.write(&frame(&bindata)).unwrap();

        old_machine.restore(DlsSnapshot {
            round: 99,
            ..old_machine.snapshot()
        });
        let new_snapshot = old_machine.snapshot();
        let bindata2 = encode_canonical(&new_snapshot).unwrap();
        sink_b.write(&frame(&bindata2)).unwrap();

        let checkpointer: Checkpointer<String> =
            Checkpointer::new(vec![Box::new(sink_a), Box::new(sink_b)]);
        let recovered = checkpointer.recover().unwrap();
        assert_eq!(recovered.round, 99);
    }

    #[test]
    fn recover_fails_when_no_sink_has_data() {
        let dir = tempdir().unwrap();
        let sinks: Vec<Box<dyn CheckpointSink>> =
            vec![Box::new(FileCheckpointSink::new(dir.path().join("missing.chk")))];
        let checkpointer: Checkpointer<String> = Checkpointer::new(sinks);
        assert!(matches!(
            checkpointer.recover(),
            Err(CheckpointError::AllSinksFailed)
        ));
    }
}
