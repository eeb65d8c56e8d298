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

//! The Dwork-Lynch-Stockmeyer state machine for a single round window.
//!
//! One instance decides a single item. The chained total-order broadcast
//! ([`crate::core::consensus::driver::PeerDriver`]) instantiates a fresh
//! machine per block number, with the item type set to a whole block (a set
//! of sequence items), not a single sequence item - the same pattern the
//! reference peer uses when it feeds `dls_sequence::new_block` output back in
//! as the next machine's starting value.

use crate::core::consensus::checkpoint::{CheckpointError, Checkpointer};
use crate::core::message::{
    ConsensusItem, InternalMsg, Phase0Msg, Phase1LockMsg, Phase2AckMsg, Release3Msg, WireMsg,
};
use crate::core::signer::SignerError;
use crate::core::types::{CanonicalMap, Phase, PeerIndex, Round};
use crate::monitoring::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the state machine.
#[derive(Debug, Error)]
pub enum DlsError {
    /// A message carried a sender index outside `0..n`.
    #[error("sender {sender} out of range for n={n}")]
    SenderOutOfRange {
        /// Offending sender index.
        sender: PeerIndex,
        /// Configured peer count.
        n: u32,
    },
    /// `locks` held more than one entry when `get_acceptable` was called -
    /// an invariant violation that should never occur if `process_release_locks`
    /// ran every round, since a correct leader only ever has evidence for one item
    /// per phase and RELEASE3 evicts stale conflicting locks.
    #[error("invariant violation: {0} concurrent locks held, expected 0 or 1")]
    MultipleLocks(usize),
    /// Packaging a freshly-minted message into its wire form failed.
    #[error("packaging")]
    Packaging(#[from] SignerError),
    /// Persisting a round-end checkpoint failed on every configured sink.
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// A snapshot of everything required to resume a machine after a crash: the
/// same seven fields the reference implementation's `persist` tuple carries
/// (`i, vi, N, all_seen, round, locks, decision`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DlsSnapshot<I: ConsensusItem> {
    /// This peer's index.
    pub my_id: PeerIndex,
    /// This peer's own initial value.
    pub my_value: I,
    /// Peer count.
    pub n: u32,
    /// Monotonic union of every acceptable set ever seen.
    pub all_seen: BTreeSet<I>,
    /// Current round.
    pub round: Round,
    /// Current locks table.
    pub locks: CanonicalMap<I, Phase1LockMsg<I>>,
    /// The decided item, if any.
    pub decision: Option<I>,
}

/// A pluggable hook that turns a freshly-minted internal message into one
/// carrying a signed wire back-reference. Mirrors the reference
/// implementation's `make_raw` callback, which the driving peer layer injects
/// so the state machine itself never needs to know about signatures.
pub trait RawPackager<I: ConsensusItem>: Send + Sync {
    /// Attach (or leave alone, if already attached) a `raw` wire back-reference.
    fn package(&self, msg: InternalMsg<I>) -> Result<InternalMsg<I>, SignerError>;
}

/// The no-op packager: leaves `raw` unset. Useful for tests exercising the
/// state machine in isolation.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityPackager;

impl<I: ConsensusItem> RawPackager<I> for IdentityPackager {
    fn package(&self, msg: InternalMsg<I>) -> Result<InternalMsg<I>, SignerError> {
        Ok(msg)
    }
}

/// One DLS round-window state machine, deciding a single item of type `I`.
pub struct DlsStateMachine<I: ConsensusItem> {
    my_id: PeerIndex,
    my_value: I,
    n: u32,
    f: u32,
    all_seen: BTreeSet<I>,
    round: Round,
    locks: CanonicalMap<I, Phase1LockMsg<I>>,
    decision: Option<I>,
    buf_in: HashSet<InternalMsg<I>>,
    buf_out: HashSet<InternalMsg<I>>,
    packager: Box<dyn RawPackager<I>>,
    checkpointer: Option<Arc<Checkpointer<I>>>,
    metrics: Option<Arc<Metrics>>,
}

impl<I: ConsensusItem> std::fmt::Debug for DlsStateMachine<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlsStateMachine")
            .field("my_id", &self.my_id)
            .field("n", &self.n)
            .field("round", &self.round)
            .field("locks", &self.locks.len())
            .field("decision_reached", &self.decision.is_some())
            .finish()
    }
}

impl<I: ConsensusItem> DlsStateMachine<I> {
    /// Construct a fresh machine. `start_round` lets the chained driver carry
    /// round numbers forward across block boundaries instead of resetting to
    /// zero at every new block.
    pub fn new(
        my_id: PeerIndex,
        my_value: I,
        n: u32,
        start_round: Round,
        packager: Box<dyn RawPackager<I>>,
    ) -> Self {
        assert!((my_id as u64) < n as u64, "my_id must be < n");
        let f = (n - 1) / 3;
        let mut all_seen = BTreeSet::new();
        all_seen.insert(my_value.clone());
        Self {
            my_id,
            my_value,
            n,
            f,
            all_seen,
            round: start_round,
            locks: CanonicalMap::new(),
            decision: None,
            buf_in: HashSet::new(),
            buf_out: HashSet::new(),
            packager,
            checkpointer: None,
            metrics: None,
        }
    }

    /// Attach (or detach, with `None`) the durable checkpoint sinks this
    /// machine persists a snapshot to at the end of every round. Mirrors the
    /// reference implementation's optional `backup_f` constructor argument,
    /// exposed as a setter here so a chained driver can re-attach the same
    /// sinks to each block's freshly-constructed machine.
    pub fn set_checkpointer(&mut self, checkpointer: Option<Arc<Checkpointer<I>>>) {
        self.checkpointer = checkpointer;
    }

    /// Attach (or detach, with `None`) the metrics this machine reports
    /// checkpoint persist outcomes to.
    pub fn set_metrics(&mut self, metrics: Option<Arc<Metrics>>) {
        self.metrics = metrics;
    }

    fn persist(&self) -> Result<(), DlsError> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(());
        };
        let result = checkpointer.persist(&self.snapshot());
        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() { "ok" } else { "failed" };
            metrics
                .checkpoint_persists_total
                .with_label_values(&[outcome])
                .inc();
        }
        result.map_err(DlsError::Checkpoint)
    }

    /// Byzantine fault tolerance: `(n - 1) / 3`.
    pub fn faulty(&self) -> u32 {
        self.f
    }

    /// Peer count.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Current round.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Number of items currently locked. Should be 0 or 1 in any reachable
    /// state once an honest leader's LOCKRELEASE3 sweep has run.
    pub fn locks_len(&self) -> usize {
        self.locks.len()
    }

    /// Force the round counter forward, e.g. to catch up with peers who are
    /// already further along. Never moves it backward.
    pub fn set_round(&mut self, round: Round) {
        if round > self.round {
            self.round = round;
        }
    }

    /// The decided item, if consensus has been reached.
    pub fn decision(&self) -> Option<&I> {
        self.decision.as_ref()
    }

    /// Phase number for a given round: `round / 4`.
    pub fn phase_k(&self, round: Round) -> Phase {
        round / 4
    }

    /// The leader for a given phase: `phase % n`.
    pub fn leader_for_phase(&self, phase: Phase) -> PeerIndex {
        (phase % self.n as u64) as PeerIndex
    }

    /// The leader for a given round.
    pub fn leader_for_round(&self, round: Round) -> PeerIndex {
        self.leader_for_phase(self.phase_k(round))
    }

    /// The round type: 0-2 are TRYING0-2, 3 is LOCKRELEASE3.
    pub fn round_type(&self, round: Round) -> u64 {
        round % 4
    }

    /// Verify a PHASE1LOCK's evidence: sender must be the phase's leader,
    /// every piece of evidence a matching PHASE0 at the same phase voting for
    /// the locked item, and the distinct senders must reach quorum.
    pub fn check_phase1msg(&self, msg: &Phase1LockMsg<I>) -> bool {
        if msg.sender != self.leader_for_phase(msg.phase) {
            return false;
        }

        let mut voters = HashSet::new();
        for e in &msg.evidence {
            if e.phase != msg.phase || !e.acceptable.contains(&msg.item) {
                return false;
            }
            voters.insert(e.sender);
        }

        voters.len() as u32 >= self.n - self.f
    }

    /// The set of items this peer currently finds acceptable: the decision if
    /// one was reached, else the sole lock if exactly one is held, else the
    /// full `all_seen` set.
    pub fn get_acceptable(&self) -> Result<BTreeSet<I>, DlsError> {
        if let Some(d) = &self.decision {
            let mut s = BTreeSet::new();
            s.insert(d.clone());
            return Ok(s);
        }

        match self.locks.len() {
            0 => Ok(self.all_seen.clone()),
            1 => {
                let mut s = BTreeSet::new();
                s.insert(self.locks.keys().next().unwrap().clone());
                Ok(s)
            }
            n => Err(DlsError::MultipleLocks(n)),
        }
    }

    fn push_out_and_in(&mut self, msg: InternalMsg<I>, also_in: bool) -> Result<(), DlsError> {
        let packaged = self.packager.package(msg)?;
        self.buf_out.insert(packaged.clone());
        if also_in {
            self.buf_in.insert(packaged);
        }
        Ok(())
    }

    /// TRYING0: broadcast the current acceptable set, and seed our own input
    /// buffer with it immediately (so a solo leader still sees its own vote).
    pub fn process_trying_0(&mut self) -> Result<(), DlsError> {
        let acceptable = self.get_acceptable()?;
        let k = self.phase_k(self.round);
        let msg = InternalMsg::Phase0(Phase0Msg {
            acceptable,
            phase: k,
            sender: self.my_id,
            raw: None,
        });
        self.push_out_and_in(msg, true)
    }

    /// TRYING1: if we are this phase's leader, tally every PHASE0 received
    /// for the current phase, keep only items with quorum support, and lock
    /// the one we prefer (our own value if it qualifies, else the largest
    /// under `I`'s total order, matching the reference tie-break).
    pub fn process_trying_1(&mut self) -> Result<(), DlsError> {
        if self.my_id != self.leader_for_round(self.round) {
            return Ok(());
        }

        let k = self.phase_k(self.round);
        let mut votes: CanonicalMap<I, HashSet<PeerIndex>> = CanonicalMap::new();
        let mut evidence: CanonicalMap<I, Vec<Phase0Msg<I>>> = CanonicalMap::new();

        for msg in &self.buf_in {
            if let InternalMsg::Phase0(p0) = msg {
                if p0.phase != k {
                    continue;
                }
                for item in &p0.acceptable {
                    votes.entry(item.clone()).or_default().insert(p0.sender);
                    evidence.entry(item.clone()).or_default().push(p0.clone());
                }
            }
        }

        votes.retain(|_, v| v.len() as u32 >= self.n - self.f);
        if votes.is_empty() {
            return Ok(());
        }

        let item = if votes.contains_key(&self.my_value) {
            self.my_value.clone()
        } else {
            votes.keys().max().unwrap().clone()
        };
        let item_evidence = evidence.remove(&item).unwrap_or_default();

        let msg = InternalMsg::Phase1Lock(Phase1LockMsg {
            item,
            phase: k,
            evidence: item_evidence,
            sender: self.my_id,
            raw: None,
        });

        self.push_out_and_in(msg, true)
    }

    /// TRYING2: accept any well-formed PHASE1LOCK for the current phase,
    /// record it in `locks`, and acknowledge it.
    pub fn process_trying_2(&mut self) -> Result<(), DlsError> {
        let k = self.phase_k(self.round);
        let candidates: Vec<Phase1LockMsg<I>> = self
            .buf_in
            .iter()
            .filter_map(|m| match m {
                InternalMsg::Phase1Lock(l) if l.phase == k && self.check_phase1msg(l) => {
                    Some(l.clone())
                }
                _ => None,
            })
            .collect();

        for lock in candidates {
            let item = lock.item.clone();
            self.locks.insert(item.clone(), lock);

            let ack = InternalMsg::Phase2Ack(Phase2AckMsg {
                item,
                phase: k,
                sender: self.my_id,
                raw: None,
            });
            let also_in = self.my_id == self.leader_for_round(self.round);
            self.push_out_and_in(ack, also_in)?;
        }
        Ok(())
    }

    /// LOCKRELEASE3: re-broadcast every held lock as RELEASE3 evidence, so
    /// peers who missed the original PHASE1LOCK (or whose lock conflicts)
    /// can catch up or evict a stale lock.
    pub fn process_lockrelease_3(&mut self) -> Result<(), DlsError> {
        let k = self.phase_k(self.round);
        let locks: Vec<Phase1LockMsg<I>> = self.locks.values().cloned().collect();
        for lock in locks {
            let msg = InternalMsg::Release3(Release3Msg {
                evidence: lock,
                phase: k,
                sender: self.my_id,
                raw: None,
            });
            self.push_out_and_in(msg, true)?;
        }
        Ok(())
    }

    /// Evict locks older than, and distinct from, any well-evidenced RELEASE3
    /// we observe. Runs every round regardless of round type.
    ///
    /// The eviction test is `new_lock.phase >= old_lock.phase`, matching the
    /// reference implementation exactly: a RELEASE3 at the *same* phase as an
    /// existing distinct-item lock also evicts it. That is intentional
    /// upstream behavior, not a bug to silently tighten to strict `>`.
    pub fn process_release_locks(&mut self) {
        let released: Vec<Phase1LockMsg<I>> = self
            .buf_in
            .iter()
            .filter_map(|m| match m {
                InternalMsg::Release3(r) if self.check_phase1msg(&r.evidence) => {
                    Some(r.evidence.clone())
                }
                _ => None,
            })
            .collect();

        for new_lock in released {
            self.locks.retain(|item, old_lock| {
                !(*item != new_lock.item && new_lock.phase >= old_lock.phase)
            });
        }
    }

    /// Tally PHASE2ACKs for phases we led; once a quorum acks the same item,
    /// decide it.
    pub fn process_acks(&mut self) {
        let mut tally: CanonicalMap<I, HashSet<PeerIndex>> = CanonicalMap::new();
        for msg in &self.buf_in {
            if let InternalMsg::Phase2Ack(ack) = msg {
                if self.leader_for_phase(ack.phase) != self.my_id {
                    continue;
                }
                let voters = tally.entry(ack.item.clone()).or_default();
                voters.insert(ack.sender);
                if voters.len() as u32 >= self.n - self.f {
                    self.decision = Some(ack.item.clone());
                }
            }
        }
    }

    /// Absorb every PHASE0's acceptable set into `all_seen`. Monotonic union,
    /// never shrinks.
    pub fn find_seen(&mut self) {
        for msg in &self.buf_in {
            if let InternalMsg::Phase0(p0) = msg {
                self.all_seen.extend(p0.acceptable.iter().cloned());
            }
        }
    }

    /// Drop input messages scoped to phases strictly older than the current one.
    pub fn clear_old_messages(&mut self) {
        let k = self.phase_k(self.round);
        self.buf_in.retain(|m| m.phase() >= k);
    }

    /// The background sweep that runs every round regardless of round type,
    /// in this exact order: absorb newly seen items, release stale locks,
    /// drop expired messages, then tally acks.
    pub fn do_background(&mut self) {
        self.find_seen();
        self.process_release_locks();
        self.clear_old_messages();
        self.process_acks();
    }

    /// Run one round: the background sweep, then the round-type-specific
    /// phase handler, then persist a checkpoint (a no-op if no sinks are
    /// attached), then advance the round counter (unless `advance` is
    /// `false`, e.g. when the caller wants to replay the same round).
    pub fn process_round(&mut self, advance: bool) -> Result<Round, DlsError> {
        self.do_background();

        match self.round_type(self.round) {
            0 => self.process_trying_0()?,
            1 => self.process_trying_1()?,
            2 => self.process_trying_2()?,
            3 => self.process_lockrelease_3()?,
            _ => unreachable!("round % 4 < 4"),
        }

        self.persist()?;

        if advance {
            self.round += 1;
        }
        Ok(self.round)
    }

    /// Insert externally-received messages into the input buffer, rejecting
    /// any whose sender index is out of range.
    pub fn put_messages(&mut self, msgs: impl IntoIterator<Item = InternalMsg<I>>) -> Result<(), DlsError> {
        for msg in msgs {
            if msg.sender() >= self.n {
                return Err(DlsError::SenderOutOfRange {
                    sender: msg.sender(),
                    n: self.n,
                });
            }
            self.buf_in.insert(msg);
        }
        Ok(())
    }

    /// Drain and return every message queued for broadcast since the last call.
    pub fn get_messages(&mut self) -> Vec<InternalMsg<I>> {
        self.buf_out.drain().collect()
    }

    /// Capture a serializable snapshot for checkpointing.
    pub fn snapshot(&self) -> DlsSnapshot<I> {
        DlsSnapshot {
            my_id: self.my_id,
            my_value: self.my_value.clone(),
            n: self.n,
            all_seen: self.all_seen.clone(),
            round: self.round,
            locks: self.locks.clone(),
            decision: self.decision.clone(),
        }
    }

    /// Restore state from a snapshot, keeping the current packager.
    pub fn restore(&mut self, snapshot: DlsSnapshot<I>) {
        self.my_id = snapshot.my_id;
        self.my_value = snapshot.my_value;
        self.n = snapshot.n;
        self.f = (self.n - 1) / 3;
        self.all_seen = snapshot.all_seen;
        self.round = snapshot.round;
        self.locks = snapshot.locks;
        self.decision = snapshot.decision;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(id: PeerIndex, value: &str, n: u32) -> DlsStateMachine<String> {
        DlsStateMachine::new(id, value.to_string(), n, 0, Box::new(IdentityPackager))
    }

    fn run_round(peers: &mut [DlsStateMachine<String>]) {
        let mut outbox: Vec<Vec<InternalMsg<String>>> = Vec::with_capacity(peers.len());
        for p in peers.iter_mut() {
            p.process_round(true).unwrap();
            outbox.push(p.get_messages());
        }
        for msgs in outbox {
            for p in peers.iter_mut() {
                p.put_messages(msgs.clone()).unwrap();
            }
        }
    }

    #[test]
    fn synchronous_happy_path_converges() {
        // Scenario S1: 4 peers, no faults, all start with distinct values;
        // round-robin leadership should reach a shared decision quickly.
        let mut peers = vec![
            machine(0, "hello0", 4),
            machine(1, "hello1", 4),
            machine(2, "hello2", 4),
            machine(3, "hello3", 4),
        ];

        for _ in 0..16 {
            run_round(&mut peers);
            if peers.iter().all(|p| p.decision().is_some()) {
                break;
            }
        }

        let decisions: BTreeSet<_> = peers.iter().map(|p| p.decision().cloned()).collect();
        assert_eq!(decisions.len(), 1, "all peers must agree on one decision");
        assert!(decisions.iter().next().unwrap().is_some());
    }

    #[test]
    fn get_acceptable_rejects_multiple_locks() {
        let mut m = machine(0, "v0", 4);
        m.locks.insert(
            "a".to_string(),
            Phase1LockMsg {
                item: "a".to_string(),
                phase: 0,
                evidence: vec![],
                sender: 0,
                raw: None,
            },
        );
        m.locks.insert(
            "b".to_string(),
            Phase1LockMsg {
                item: "b".to_string(),
                phase: 0,
                evidence: vec![],
                sender: 0,
                raw: None,
            },
        );
        assert!(matches!(m.get_acceptable(), Err(DlsError::MultipleLocks(2))));
    }

    #[test]
    fn clear_old_messages_drops_stale_phase() {
        let mut m = machine(0, "v0", 4);
        m.round = 4; // phase 1
        m.put_messages(vec![InternalMsg::Phase0(Phase0Msg {
            acceptable: BTreeSet::from(["x".to_string()]),
            phase: 0,
            sender: 1,
            raw: None,
        })])
        .unwrap();
        m.clear_old_messages();
        assert!(m.buf_in.is_empty());
    }

    #[test]
    fn put_messages_rejects_out_of_range_sender() {
        let mut m = machine(0, "v0", 4);
        let err = m
            .put_messages(vec![InternalMsg::Phase2Ack(Phase2AckMsg {
                item: "x".to_string(),
                phase: 0,
                sender: 9,
                raw: None,
            })])
            .unwrap_err();
        assert!(matches!(err, DlsError::SenderOutOfRange { sender: 9, n: 4 }));
    }
}
