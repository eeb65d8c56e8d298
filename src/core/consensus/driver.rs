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

//! The peer driver: wraps one [`DlsStateMachine`] per block, signs and
//! decodes wire messages, routes them per the leader/follower policy, and
//! chains decided blocks into a [`SequenceLedger`].

use crate::core::consensus::checkpoint::{CheckpointSink, Checkpointer};
use crate::core::consensus::dls::{DlsError, DlsStateMachine, RawPackager};
use crate::core::ledger::{LedgerError, SequenceLedger};
use crate::core::message::{
    Block, ConsensusItem, InternalMsg, Phase0Msg, Phase1LockMsg, Phase2AckMsg, WireAcceptable,
    WireAck, WireDecision, WireLock, WireMsg,
};
use crate::core::signer::{signing_bytes, Signer, SignerError};
use crate::core::types::{BlockNo, ChannelId, PeerIndex, Round};
use crate::monitoring::metrics::Metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The state machine rejected a message or an internal invariant broke.
    #[error("state machine: {0}")]
    StateMachine(#[from] DlsError),
    /// The sequence ledger rejected a block commit.
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    /// Signing or verifying a wire message failed.
    #[error("signer: {0}")]
    Signer(#[from] SignerError),
}

fn verify<I: ConsensusItem>(
    signer: &dyn Signer,
    pubs: &[Vec<u8>],
    addr_index: &HashMap<String, usize>,
    msg: &WireMsg<I>,
) -> bool {
    // PUT and ASK are unsigned client requests from addresses that need not
    // be in the peer set; authentication for them is out of scope.
    if matches!(msg, WireMsg::Put(_) | WireMsg::Ask(_)) {
        return true;
    }

    let Some(&idx) = addr_index.get(msg.sender()) else {
        return false;
    };
    let Some(pubkey) = pubs.get(idx) else {
        return false;
    };
    let (payload, signature) = match msg {
        WireMsg::Acceptable(m) => (
            signing_bytes(
                &(&m.channel, &m.sender, m.bno, m.phase, &m.blocks),
                pubkey,
            ),
            m.signature.clone(),
        ),
        WireMsg::Lock(m) => (
            signing_bytes(
                &(&m.channel, &m.sender, m.bno, m.phase, &m.block, &m.evidence),
                pubkey,
            ),
            m.signature.clone(),
        ),
        WireMsg::Ack(m) => (
            signing_bytes(&(&m.channel, &m.sender, m.bno, m.phase, &m.block), pubkey),
            m.signature.clone(),
        ),
        WireMsg::Decision(m) => (
            signing_bytes(&(&m.channel, &m.sender, m.bno, &m.block), pubkey),
            m.signature.clone(),
        ),
        // PUT and ASK are unsigned client requests; authentication is out of scope.
        WireMsg::Put(_) | WireMsg::Ask(_) => return true,
    };
    match (payload, signature) {
        (Ok(payload), Some(sig)) => signer.verify(&payload, pubkey, &sig),
        _ => false,
    }
}

/// Sign a not-yet-signed wire message, producing its final wire form.
struct WirePackager<I: ConsensusItem, S: Signer> {
    channel: ChannelId,
    sender_addr: String,
    sender_pub: Vec<u8>,
    bno: BlockNo,
    signer: Arc<S>,
    _marker: std::marker::PhantomData<I>,
}

impl<I: ConsensusItem, S: Signer> WirePackager<I, S> {
    fn sign<M: serde::Serialize>(&self, msg_without_sig: &M) -> Result<Vec<u8>, SignerError> {
        let payload = signing_bytes(msg_without_sig, &self.sender_pub)?;
        self.signer.sign(&payload)
    }
}

impl<I: ConsensusItem, S: Signer> RawPackager<Block<I>> for WirePackager<I, S> {
    fn package(&self, msg: InternalMsg<Block<I>>) -> Result<InternalMsg<Block<I>>, SignerError> {
        if msg.raw().is_some() {
            return Ok(msg);
        }

        match msg {
            InternalMsg::Phase0(p0) => {
                let unsigned = WireAcceptable {
                    channel: self.channel.clone(),
                    sender: self.sender_addr.clone(),
                    bno: self.bno,
                    phase: p0.phase,
                    blocks: p0.acceptable.clone(),
                    signature: None,
                };
                let sig = self.sign(&(
                    &unsigned.channel,
                    &unsigned.sender,
                    unsigned.bno,
                    unsigned.phase,
                    &unsigned.blocks,
                ))?;
                let signed = WireAcceptable {
                    signature: Some(sig),
                    ..unsigned
                };
                Ok(InternalMsg::Phase0(Phase0Msg {
                    raw: Some(WireMsg::Acceptable(signed)),
                    ..p0
                }))
            }
            InternalMsg::Phase1Lock(lock) => {
                let mut evidence: Vec<WireMsg<I>> = lock
                    .evidence
                    .iter()
                    .filter_map(|e| e.raw.clone())
                    .collect();
                evidence.sort();
                let unsigned = WireLock {
                    channel: self.channel.clone(),
                    sender: self.sender_addr.clone(),
                    bno: self.bno,
                    phase: lock.phase,
                    block: lock.item.clone(),
                    evidence,
                    signature: None,
                };
                let sig = self.sign(&(
                    &unsigned.channel,
                    &unsigned.sender,
                    unsigned.bno,
                    unsigned.phase,
                    &unsigned.block,
                    &unsigned.evidence,
                ))?;
                let signed = WireLock {
                    signature: Some(sig),
                    ..unsigned
                };
                Ok(InternalMsg::Phase1Lock(Phase1LockMsg {
                    raw: Some(WireMsg::Lock(signed)),
                    ..lock
                }))
            }
            InternalMsg::Phase2Ack(ack) => {
                let unsigned = WireAck {
                    channel: self.channel.clone(),
                    sender: self.sender_addr.clone(),
                    bno: self.bno,
                    phase: ack.phase,
                    block: ack.item.clone(),
                    signature: None,
                };
                let sig = self.sign(&(
                    &unsigned.channel,
                    &unsigned.sender,
                    unsigned.bno,
                    unsigned.phase,
                    &unsigned.block,
                ))?;
                let signed = WireAck {
                    signature: Some(sig),
                    ..unsigned
                };
                Ok(InternalMsg::Phase2Ack(Phase2AckMsg {
                    raw: Some(WireMsg::Ack(signed)),
                    ..ack
                }))
            }
            InternalMsg::Release3(rel) => {
                // RELEASE3 carries no independent wire form: its raw is simply
                // its evidence's raw (the LOCK it re-releases).
                let raw = rel.evidence.raw.clone();
                Ok(InternalMsg::Release3(crate::core::message::Release3Msg {
                    raw,
                    ..rel
                }))
            }
        }
    }
}

fn sign_decision<I: ConsensusItem>(
    packager_signer: &dyn Signer,
    sender_pub: &[u8],
    unsigned: WireDecision<I>,
) -> Result<WireDecision<I>, SignerError> {
    let payload = signing_bytes(
        &(&unsigned.channel, &unsigned.sender, unsigned.bno, &unsigned.block),
        sender_pub,
    )?;
    let sig = packager_signer.sign(&payload)?;
    Ok(WireDecision {
        signature: Some(sig),
        ..unsigned
    })
}

/// Drives one peer's participation across the whole chained sequence: signs
/// outgoing messages, verifies and decodes incoming ones, routes per the
/// leader/follower broadcast policy, and advances from one block's state
/// machine to the next as decisions are reached.
pub struct PeerDriver<I: ConsensusItem, S: Signer> {
    my_id: PeerIndex,
    addrs: Vec<String>,
    addr_index: HashMap<String, usize>,
    pubs: Vec<Vec<u8>>,
    channel_id: ChannelId,
    current_block_no: BlockNo,
    sm: DlsStateMachine<Block<I>>,
    decisions: HashMap<BlockNo, HashSet<WireDecision<I>>>,
    output: HashSet<(String, WireMsg<I>)>,
    seq: SequenceLedger<I>,
    signer: Arc<S>,
    checkpointer: Option<Arc<Checkpointer<Block<I>>>>,
    metrics: Option<Arc<Metrics>>,
}

impl<I: ConsensusItem, S: Signer + 'static> PeerDriver<I, S> {
    /// Construct a new driver for a fixed peer set. `addrs[my_id]`/`pubs[my_id]`
    /// must correspond to `signer`'s keypair.
    pub fn new(
        my_id: PeerIndex,
        addrs: Vec<String>,
        pubs: Vec<Vec<u8>>,
        channel_id: ChannelId,
        start_round: Round,
        signer: S,
    ) -> Self {
        assert_eq!(addrs.len(), pubs.len());
        assert!((my_id as usize) < addrs.len());

        let addr_index: HashMap<String, usize> = addrs
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i))
            .collect();
        let signer = Arc::new(signer);
        let n = addrs.len() as u32;
        let mut seq = SequenceLedger::new();
        let proposal0 = seq.new_block(0);

        let packager: Box<dyn RawPackager<Block<I>>> = Box::new(WirePackager::<I, S> {
            channel: channel_id.clone(),
            sender_addr: addrs[my_id as usize].clone(),
            sender_pub: pubs[my_id as usize].clone(),
            bno: 0,
            signer: Arc::clone(&signer),
            _marker: std::marker::PhantomData,
        });

        let sm = DlsStateMachine::new(my_id, proposal0, n, start_round, packager);

        Self {
            my_id,
            addrs,
            addr_index,
            pubs,
            channel_id,
            current_block_no: 0,
            sm,
            decisions: HashMap::new(),
            output: HashSet::new(),
            seq,
            signer,
            checkpointer: None,
            metrics: None,
        }
    }

    /// Attach metrics, reporting round advance, decisions reached, dropped
    /// messages, and checkpoint persist outcomes. Call before
    /// [`with_checkpoint_sinks`](Self::with_checkpoint_sinks) so a recovery
    /// performed there is itself counted.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.sm.set_metrics(Some(Arc::clone(&metrics)));
        self.metrics = Some(metrics);
        self
    }

    /// Attach durable checkpoint sinks (one per `NodeConfig.backup.paths`
    /// entry, typically): recovers the active block's round-window state from
    /// whichever sink holds the highest-round intact snapshot, if any, then
    /// persists a fresh checkpoint to all of them at the end of every
    /// subsequent round. This is the crash-recovery entry point - call once,
    /// at driver construction, before processing any rounds.
    pub fn with_checkpoint_sinks(mut self, sinks: Vec<Box<dyn CheckpointSink>>) -> Self {
        let checkpointer = Arc::new(Checkpointer::new(sinks));
        if let Ok(snapshot) = checkpointer.recover() {
            self.sm.restore(snapshot);
            if let Some(metrics) = &self.metrics {
                metrics.checkpoint_recoveries_total.inc();
            }
        }
        self.sm.set_checkpointer(Some(Arc::clone(&checkpointer)));
        self.checkpointer = Some(checkpointer);
        self
    }

    /// This peer's own address.
    pub fn my_addr(&self) -> &str {
        &self.addrs[self.my_id as usize]
    }

    /// The current round, as tracked by the active block's state machine.
    pub fn round(&self) -> Round {
        self.sm.round()
    }

    /// Whether this peer leads round `r` (defaults to the current round).
    pub fn i_am_leader(&self, r: Option<Round>) -> bool {
        self.sm.leader_for_round(r.unwrap_or(self.sm.round())) == self.my_id
    }

    fn all_others(&self) -> Vec<String> {
        self.addrs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i as u32 != self.my_id)
            .map(|(_, a)| a.clone())
            .collect()
    }

    fn count_dropped(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.messages_dropped_total.with_label_values(&[reason]).inc();
        }
    }

    /// Tally `decisions[bno]` for a quorum-agreed block, if one exists.
    pub fn has_quorum(&self, bno: Option<BlockNo>) -> Option<Block<I>> {
        let bno = bno.unwrap_or(self.current_block_no);
        let set = self.decisions.get(&bno)?;
        if set.is_empty() {
            return None;
        }
        let mut tally: HashMap<&Block<I>, u32> = HashMap::new();
        for d in set {
            *tally.entry(&d.block).or_insert(0) += 1;
        }
        let (block, votes) = tally.into_iter().max_by_key(|(_, v)| *v)?;
        let f = (self.addrs.len() as u32 - 1) / 3;
        if votes >= self.addrs.len() as u32 - f {
            Some(block.clone())
        } else {
            None
        }
    }

    fn build_decisions(&mut self, bno: BlockNo) -> Result<Vec<WireDecision<I>>, DriverError> {
        let val = if bno < self.current_block_no {
            match self.has_quorum(Some(bno)) {
                Some(v) => v,
                None => return Ok(vec![]),
            }
        } else if bno == self.current_block_no {
            match self.sm.decision() {
                Some(v) => v.clone(),
                None => return Ok(vec![]),
            }
        } else {
            return Ok(vec![]);
        };

        let already = self
            .decisions
            .get(&bno)
            .map(|s| s.iter().any(|d| d.sender == self.my_addr()))
            .unwrap_or(false);

        if !already {
            let unsigned = WireDecision {
                channel: self.channel_id.clone(),
                sender: self.my_addr().to_string(),
                bno,
                block: val,
                signature: None,
            };
            let signed = sign_decision(
                self.signer.as_ref(),
                &self.pubs[self.my_id as usize],
                unsigned,
            )?;
            self.decisions.entry(bno).or_default().insert(signed);
        }

        Ok(self.decisions.get(&bno).cloned().unwrap_or_default().into_iter().collect())
    }

    /// Decode a verified wire message into zero or more internal messages for
    /// the current block's state machine.
    fn decode_raw(&self, msg: &WireMsg<I>) -> Vec<InternalMsg<Block<I>>> {
        let Some(&sender_id) = self.addr_index.get(msg.sender()) else {
            self.count_dropped("sender_out_of_range");
            return vec![];
        };
        let sender_id = sender_id as PeerIndex;

        match msg {
            WireMsg::Decision(d) => {
                if d.bno != self.current_block_no {
                    return vec![];
                }
                let k = self.sm.phase_k(self.sm.round());
                let mut block = Block::<I>::new();
                block.insert(d.block.clone());
                vec![
                    InternalMsg::Phase0(Phase0Msg {
                        acceptable: block,
                        phase: k,
                        sender: sender_id,
                        raw: Some(msg.clone()),
                    }),
                    InternalMsg::Phase2Ack(Phase2AckMsg {
                        item: d.block.clone(),
                        phase: k,
                        sender: sender_id,
                        raw: Some(msg.clone()),
                    }),
                ]
            }
            WireMsg::Acceptable(a) => vec![InternalMsg::Phase0(Phase0Msg {
                acceptable: a.blocks.clone(),
                phase: a.phase,
                sender: sender_id,
                raw: Some(msg.clone()),
            })],
            WireMsg::Lock(l) => {
                let mut evidence = Vec::with_capacity(l.evidence.len());
                for e in &l.evidence {
                    if !verify(self.signer.as_ref(), &self.pubs, &self.addr_index, e) {
                        debug!("dropping LOCK with unverifiable evidence entry");
                        self.count_dropped("bad_evidence");
                        return vec![];
                    }
                    let mut decoded = self
                        .decode_raw(e)
                        .into_iter()
                        .filter_map(|m| match m {
                            InternalMsg::Phase0(p0) => Some(p0),
                            _ => None,
                        });
                    match (decoded.next(), decoded.next()) {
                        (Some(p0), None) => evidence.push(p0),
                        _ => return vec![],
                    }
                }
                let lock = Phase1LockMsg {
                    item: l.block.clone(),
                    phase: l.phase,
                    evidence,
                    sender: sender_id,
                    raw: Some(msg.clone()),
                };
                let release = crate::core::message::Release3Msg {
                    evidence: lock.clone(),
                    phase: l.phase,
                    sender: sender_id,
                    raw: Some(msg.clone()),
                };
                vec![InternalMsg::Phase1Lock(lock), InternalMsg::Release3(release)]
            }
            WireMsg::Ack(a) => vec![InternalMsg::Phase2Ack(Phase2AckMsg {
                item: a.block.clone(),
                phase: a.phase,
                sender: sender_id,
                raw: Some(msg.clone()),
            })],
            // Neither reached from `put_messages` for a block without a ready
            // decision: an ASK the state machine can't yet answer is simply
            // not actionable, rather than the panic the reference decoder
            // would hit on this path.
            WireMsg::Put(_) | WireMsg::Ask(_) => vec![],
        }
    }

    /// Feed a batch of freshly-received wire messages into the driver.
    /// Messages for a foreign channel are silently dropped.
    pub fn put_messages(
        &mut self,
        msgs: impl IntoIterator<Item = WireMsg<I>>,
    ) -> Result<(), DriverError> {
        for msg in msgs {
            if msg.channel() != self.channel_id {
                self.count_dropped("foreign_channel");
                continue;
            }

            if !verify(self.signer.as_ref(), &self.pubs, &self.addr_index, &msg) {
                debug!(sender = msg.sender(), "dropping message with invalid signature");
                self.count_dropped("bad_signature");
                continue;
            }

            if let WireMsg::Put(p) = &msg {
                self.seq.put_item(p.item.clone());
                continue;
            }

            if let WireMsg::Acceptable(a) = &msg {
                for block in &a.blocks {
                    for item in block {
                        self.seq.put_item(item.clone());
                    }
                }
            }

            if let WireMsg::Decision(d) = &msg {
                let already = self
                    .decisions
                    .get(&d.bno)
                    .map(|s| s.iter().any(|existing| existing.sender == d.sender))
                    .unwrap_or(false);
                if !already {
                    self.decisions.entry(d.bno).or_default().insert(d.clone());
                }
                let decoded = self.decode_raw(&msg);
                self.sm.put_messages(decoded)?;
                continue;
            }

            let bno = msg.bno();
            let has_decision_for_current = bno == self.current_block_no && self.sm.decision().is_some();
            let has_decision = has_decision_for_current || bno != self.current_block_no;

            if matches!(
                msg,
                WireMsg::Acceptable(_) | WireMsg::Lock(_) | WireMsg::Ack(_) | WireMsg::Ask(_)
            ) && has_decision
            {
                let sender = msg.sender().to_string();
                for d in self.build_decisions(bno)? {
                    self.output.insert((sender.clone(), WireMsg::Decision(d)));
                }
                continue;
            }

            let decoded = self.decode_raw(&msg);
            self.sm.put_messages(decoded)?;
        }
        Ok(())
    }

    /// Drain and route every message the state machine emitted since the
    /// last call: the leader broadcasts to everyone, followers send only to
    /// the leader, matching the reference routing policy.
    pub fn get_messages(&mut self) -> Vec<(String, WireMsg<I>)> {
        let buf_out = self.sm.get_messages();
        let all_others = self.all_others();
        let receivers = if self.i_am_leader(None) {
            all_others
        } else {
            vec![self.addrs[self.sm.leader_for_round(self.sm.round()) as usize].clone()]
        };

        for msg in buf_out {
            if let Some(raw) = msg.raw() {
                for r in &receivers {
                    self.output.insert((r.clone(), raw.clone()));
                }
            }
        }

        self.output.drain().collect()
    }

    /// Advance to the next round, chaining to a fresh block's state machine
    /// once the current block reaches a decision. `set_round`, if given and
    /// ahead of the current round, jumps the new round forward immediately
    /// (used to catch up with peers who are already further along).
    pub fn advance_round(&mut self, set_round: Option<Round>) -> Result<(), DriverError> {
        if self.has_quorum(None).is_none() {
            let carried: Vec<WireDecision<I>> = self
                .decisions
                .get(&self.current_block_no)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            self.put_messages(carried.into_iter().map(WireMsg::Decision))?;
        } else {
            let decision = self.has_quorum(None).unwrap();
            let items_in_block = decision.len() as u64;
            self.seq.set_block(self.current_block_no, decision)?;

            for d in self.build_decisions(self.current_block_no)? {
                for dest in self.all_others() {
                    self.output.insert((dest, WireMsg::Decision(d.clone())));
                }
            }

            self.current_block_no += 1;
            let proposal0 = self.seq.new_block(self.current_block_no);
            let start_round = self.sm.round();

            let packager: Box<dyn RawPackager<Block<I>>> = Box::new(WirePackager::<I, S> {
                channel: self.channel_id.clone(),
                sender_addr: self.my_addr().to_string(),
                sender_pub: self.pubs[self.my_id as usize].clone(),
                bno: self.current_block_no,
                signer: Arc::clone(&self.signer),
                _marker: std::marker::PhantomData,
            });
            self.sm = DlsStateMachine::new(self.my_id, proposal0, self.addrs.len() as u32, start_round, packager);
            self.sm.set_checkpointer(self.checkpointer.clone());
            self.sm.set_metrics(self.metrics.clone());

            if let Some(metrics) = &self.metrics {
                metrics.decisions_total.inc();
                metrics.items_committed_total.inc_by(items_in_block);
                metrics.block_height.set(self.current_block_no as i64);
            }
        }

        if let Some(r) = set_round {
            if r > self.sm.round() {
                self.sm.set_round(r);
            }
        }
        self.sm.process_round(true)?;
        if let Some(metrics) = &self.metrics {
            metrics.round.set(self.sm.round() as i64);
        }
        Ok(())
    }

    /// Schedule `item` for inclusion in a future block.
    pub fn put_sequence(&mut self, item: I) {
        self.seq.put_item(item);
    }

    /// Every item across every committed block, in commit order.
    pub fn get_sequence(&self) -> Vec<I> {
        self.seq.get_sequence().cloned().collect()
    }

    /// The current block number.
    pub fn current_block_no(&self) -> BlockNo {
        self.current_block_no
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signer::Sha256MacSigner;

    fn addrs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("peer-{i}")).collect()
    }

    fn pubs(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8]).collect()
    }

    #[test]
    fn leader_rotates_with_phase() {
        let driver: PeerDriver<String, Sha256MacSigner> = PeerDriver::new(
            0,
            addrs(4),
            pubs(4),
            "chan".to_string(),
            0,
            Sha256MacSigner,
        );
        assert!(driver.i_am_leader(Some(0)));
        assert!(!driver.i_am_leader(Some(4)));
    }

    #[test]
    fn put_sequence_then_get_sequence_round_trips_after_commit() {
        let mut driver: PeerDriver<String, Sha256MacSigner> = PeerDriver::new(
            0,
            addrs(1),
            pubs(1),
            "chan".to_string(),
            0,
            Sha256MacSigner,
        );
        driver.put_sequence("a".to_string());
        assert!(driver.get_sequence().is_empty());
    }
}
