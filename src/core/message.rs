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

//! The two parallel message algebras: *internal* protocol messages consumed
//! only by the state machine, and *wire* messages that carry block-scoped
//! context and a signature between peers. Every internal message carries a
//! `raw` back-reference to the wire message it was parsed from (or will
//! become once signed on the sending side).
//!
//! Field order within each wire struct matches
//! `original_source/dlsconsensus/types.py`'s namedtuples exactly, since that
//! order is part of the signed payload and must be preserved for signature
//! determinism.

use crate::core::types::{BlockNo, ChannelId, Phase, PeerIndex};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// Bound satisfied by the consensus item type `T` of the specification: it
/// must have a deterministic total order (the tie-break in `process_trying_1`
/// requires it) and be canonically encodable.
pub trait ConsensusItem:
    Clone + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> ConsensusItem for T where
    T: Clone + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A block is a committed (or candidate) set of items.
pub type Block<I> = BTreeSet<I>;

// ---------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------

/// `ACCEPTABLE(channel, sender, bno, phase, blocks, sig)` — the PHASE0
/// acceptable set lifted to the block level: `blocks` is a set of candidate
/// blocks, each itself a set of items.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireAcceptable<I: ConsensusItem> {
    /// Session channel id; messages with a foreign id are dropped.
    pub channel: ChannelId,
    /// Sender's address.
    pub sender: String,
    /// Block number this message is scoped to.
    pub bno: BlockNo,
    /// DLS phase.
    pub phase: Phase,
    /// Candidate blocks this sender currently finds acceptable.
    pub blocks: BTreeSet<Block<I>>,
    /// Authenticator; `None` until signed.
    pub signature: Option<Vec<u8>>,
}

/// `LOCK(channel, sender, bno, phase, block, evidence, sig)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireLock<I: ConsensusItem> {
    /// Session channel id.
    pub channel: ChannelId,
    /// Sender's address (the phase leader).
    pub sender: String,
    /// Block number.
    pub bno: BlockNo,
    /// DLS phase.
    pub phase: Phase,
    /// The item being locked.
    pub block: Block<I>,
    /// Sorted tuple of the wire forms of the PHASE0 evidence. Each entry is
    /// either an ACCEPTABLE or a replayed DECISION (the latter when the
    /// evidence was itself reconstructed from a decision replay); canonical
    /// order matters for signature determinism.
    pub evidence: Vec<WireMsg<I>>,
    /// Authenticator; `None` until signed.
    pub signature: Option<Vec<u8>>,
}

/// `ACK(channel, sender, bno, phase, block, sig)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireAck<I: ConsensusItem> {
    /// Session channel id.
    pub channel: ChannelId,
    /// Sender's address.
    pub sender: String,
    /// Block number.
    pub bno: BlockNo,
    /// DLS phase.
    pub phase: Phase,
    /// The acknowledged item.
    pub block: Block<I>,
    /// Authenticator; `None` until signed.
    pub signature: Option<Vec<u8>>,
}

/// `DECISION(channel, sender, bno, block, sig)` — timeless (no phase, no round);
/// broadcast to all, replayable by any holder.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireDecision<I: ConsensusItem> {
    /// Session channel id.
    pub channel: ChannelId,
    /// Sender's address.
    pub sender: String,
    /// Block number this decision is for.
    pub bno: BlockNo,
    /// The decided block.
    pub block: Block<I>,
    /// Authenticator; `None` until signed.
    pub signature: Option<Vec<u8>>,
}

/// `PUT(channel, sender, item)` — client request, unsigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WirePut<I: ConsensusItem> {
    /// Session channel id.
    pub channel: ChannelId,
    /// Client address.
    pub sender: String,
    /// Item to schedule for inclusion.
    pub item: I,
}

/// `ASK(channel, sender, bno)` — client read, unsigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireAsk {
    /// Session channel id.
    pub channel: ChannelId,
    /// Client address.
    pub sender: String,
    /// Requested block number.
    pub bno: BlockNo,
}

/// The closed wire message tag set: `{ACCEPTABLE, LOCK, ACK, DECISION, PUT, ASK}`.
/// Receivers MUST drop messages with unknown tags, a foreign `channel`, or a
/// failed signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WireMsg<I: ConsensusItem> {
    /// PHASE0 acceptable-set broadcast lifted to the block level.
    Acceptable(WireAcceptable<I>),
    /// Leader's PHASE1LOCK broadcast.
    Lock(WireLock<I>),
    /// Follower's PHASE2ACK.
    Ack(WireAck<I>),
    /// Timeless, replayable decision.
    Decision(WireDecision<I>),
    /// Client item submission.
    Put(WirePut<I>),
    /// Client read request for a block.
    Ask(WireAsk),
}

impl<I: ConsensusItem> WireMsg<I> {
    /// The channel this message is scoped to, for every variant including the unsigned ones.
    pub fn channel(&self) -> &str {
        match self {
            WireMsg::Acceptable(m) => &m.channel,
            WireMsg::Lock(m) => &m.channel,
            WireMsg::Ack(m) => &m.channel,
            WireMsg::Decision(m) => &m.channel,
            WireMsg::Put(m) => &m.channel,
            WireMsg::Ask(m) => &m.channel,
        }
    }

    /// The claimed sender address.
    pub fn sender(&self) -> &str {
        match self {
            WireMsg::Acceptable(m) => &m.sender,
            WireMsg::Lock(m) => &m.sender,
            WireMsg::Ack(m) => &m.sender,
            WireMsg::Decision(m) => &m.sender,
            WireMsg::Put(m) => &m.sender,
            WireMsg::Ask(m) => &m.sender,
        }
    }

    /// The block number this message is scoped to (DECISION carries no round, but does carry `bno`).
    pub fn bno(&self) -> BlockNo {
        match self {
            WireMsg::Acceptable(m) => m.bno,
            WireMsg::Lock(m) => m.bno,
            WireMsg::Ack(m) => m.bno,
            WireMsg::Decision(m) => m.bno,
            WireMsg::Put(_) => 0,
            WireMsg::Ask(m) => m.bno,
        }
    }
}

// ---------------------------------------------------------------------
// Internal messages
// ---------------------------------------------------------------------

/// `PHASE0{acceptable, phase, sender, raw}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Phase0Msg<I: ConsensusItem> {
    /// Items this peer currently finds acceptable.
    pub acceptable: BTreeSet<I>,
    /// DLS phase.
    pub phase: Phase,
    /// Sending peer's index.
    pub sender: PeerIndex,
    /// Back-reference to the wire message this was parsed from, or minted from on send.
    pub raw: Option<WireMsg<I>>,
}

/// `PHASE1LOCK{item, phase, evidence, sender, raw}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Phase1LockMsg<I: ConsensusItem> {
    /// The locked item.
    pub item: I,
    /// DLS phase this lock was taken at.
    pub phase: Phase,
    /// PHASE0 evidence proving quorum acceptability of `item` at `phase`.
    pub evidence: Vec<Phase0Msg<I>>,
    /// Sending peer's index (must be the phase leader).
    pub sender: PeerIndex,
    /// Back-reference to the wire message.
    pub raw: Option<WireMsg<I>>,
}

/// `PHASE2ACK{item, phase, sender, raw}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Phase2AckMsg<I: ConsensusItem> {
    /// The acknowledged item.
    pub item: I,
    /// DLS phase.
    pub phase: Phase,
    /// Sending peer's index.
    pub sender: PeerIndex,
    /// Back-reference to the wire message.
    pub raw: Option<WireMsg<I>>,
}

/// `RELEASE3{evidence, phase, sender, raw}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Release3Msg<I: ConsensusItem> {
    /// The PHASE1LOCK being re-released.
    pub evidence: Phase1LockMsg<I>,
    /// DLS phase the release is broadcast at.
    pub phase: Phase,
    /// Sending peer's index.
    pub sender: PeerIndex,
    /// Back-reference to the wire message (equal to `evidence.raw`).
    pub raw: Option<WireMsg<I>>,
}

/// The closed internal message tag set, used only inside the state machine.
///
/// Two internal messages with identical logical fields but different `raw`
/// compare equal and hash identically (see the manual `PartialEq`/`Hash`
/// impls below) so that re-receipt of the same logical message deduplicates
/// in the input buffer even when wrapped in a distinct wire envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum InternalMsg<I: ConsensusItem> {
    /// Acceptable-set broadcast.
    Phase0(Phase0Msg<I>),
    /// Leader's lock proposal.
    Phase1Lock(Phase1LockMsg<I>),
    /// Lock acknowledgement.
    Phase2Ack(Phase2AckMsg<I>),
    /// Lock re-broadcast for eviction of older conflicting locks.
    Release3(Release3Msg<I>),
}

impl<I: ConsensusItem> InternalMsg<I> {
    /// The phase this message is scoped to.
    pub fn phase(&self) -> Phase {
        match self {
            InternalMsg::Phase0(m) => m.phase,
            InternalMsg::Phase1Lock(m) => m.phase,
            InternalMsg::Phase2Ack(m) => m.phase,
            InternalMsg::Release3(m) => m.phase,
        }
    }

    /// The sending peer's index.
    pub fn sender(&self) -> PeerIndex {
        match self {
            InternalMsg::Phase0(m) => m.sender,
            InternalMsg::Phase1Lock(m) => m.sender,
            InternalMsg::Phase2Ack(m) => m.sender,
            InternalMsg::Release3(m) => m.sender,
        }
    }

    /// The wire message this internal message is, or will be, backed by.
    pub fn raw(&self) -> Option<&WireMsg<I>> {
        match self {
            InternalMsg::Phase0(m) => m.raw.as_ref(),
            InternalMsg::Phase1Lock(m) => m.raw.as_ref(),
            InternalMsg::Phase2Ack(m) => m.raw.as_ref(),
            InternalMsg::Release3(m) => m.raw.as_ref(),
        }
    }

    /// Returns a clone of this message with `raw` populated, if it wasn't already.
    pub fn with_raw(mut self, raw: WireMsg<I>) -> Self {
        match &mut self {
            InternalMsg::Phase0(m) if m.raw.is_none() => m.raw = Some(raw),
            InternalMsg::Phase1Lock(m) if m.raw.is_none() => m.raw = Some(raw),
            InternalMsg::Phase2Ack(m) if m.raw.is_none() => m.raw = Some(raw),
            InternalMsg::Release3(m) if m.raw.is_none() => m.raw = Some(raw),
            _ => {}
        }
        self
    }
}

// -- logical-field-only equality/hash, excluding `raw` -----------------

impl<I: ConsensusItem> PartialEq for Phase0Msg<I> {
    fn eq(&self, other: &Self) -> bool {
        self.acceptable == other.acceptable && self.phase == other.phase && self.sender == other.sender
    }
}
impl<I: ConsensusItem> Eq for Phase0Msg<I> {}
impl<I: ConsensusItem> Hash for Phase0Msg<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for item in &self.acceptable {
            item.hash(state);
        }
        self.phase.hash(state);
        self.sender.hash(state);
    }
}

impl<I: ConsensusItem> PartialEq for Phase1LockMsg<I> {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item
            && self.phase == other.phase
            && self.evidence == other.evidence
            && self.sender == other.sender
    }
}
impl<I: ConsensusItem> Eq for Phase1LockMsg<I> {}
impl<I: ConsensusItem> Hash for Phase1LockMsg<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.item.hash(state);
        self.phase.hash(state);
        self.evidence.hash(state);
        self.sender.hash(state);
    }
}

impl<I: ConsensusItem> PartialEq for Phase2AckMsg<I> {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item && self.phase == other.phase && self.sender == other.sender
    }
}
impl<I: ConsensusItem> Eq for Phase2AckMsg<I> {}
impl<I: ConsensusItem> Hash for Phase2AckMsg<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.item.hash(state);
        self.phase.hash(state);
        self.sender.hash(state);
    }
}

impl<I: ConsensusItem> PartialEq for Release3Msg<I> {
    fn eq(&self, other: &Self) -> bool {
        self.evidence == other.evidence && self.phase == other.phase && self.sender == other.sender
    }
}
impl<I: ConsensusItem> Eq for Release3Msg<I> {}
impl<I: ConsensusItem> Hash for Release3Msg<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.evidence.hash(state);
        self.phase.hash(state);
        self.sender.hash(state);
    }
}

impl<I: ConsensusItem> PartialEq for InternalMsg<I> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (InternalMsg::Phase0(a), InternalMsg::Phase0(b)) => a == b,
            (InternalMsg::Phase1Lock(a), InternalMsg::Phase1Lock(b)) => a == b,
            (InternalMsg::Phase2Ack(a), InternalMsg::Phase2Ack(b)) => a == b,
            (InternalMsg::Release3(a), InternalMsg::Release3(b)) => a == b,
            _ => false,
        }
    }
}
impl<I: ConsensusItem> Eq for InternalMsg<I> {}
impl<I: ConsensusItem> Hash for InternalMsg<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            InternalMsg::Phase0(m) => {
                0u8.hash(state);
                m.hash(state);
            }
            InternalMsg::Phase1Lock(m) => {
                1u8.hash(state);
                m.hash(state);
            }
            InternalMsg::Phase2Ack(m) => {
                2u8.hash(state);
                m.hash(state);
            }
            InternalMsg::Release3(m) => {
                3u8.hash(state);
                m.hash(state);
            }
        }
    }
}
