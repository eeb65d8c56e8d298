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

//! The chained sequence ledger: the layer above a single DLS decision that
//! turns a stream of decided blocks into one total order over client items.
//!
//! Mirrors `dls_sequence` from the reference peer: items are staged in
//! `to_be_sequenced` until a block containing them commits, at which point
//! they move into `sequence` and the block is appended to `old_blocks`.

use crate::core::message::{Block, ConsensusItem};
use crate::core::types::BlockNo;
use std::collections::BTreeSet;
use thiserror::Error;

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// `set_block` was called with a block number other than the next expected one.
    #[error("wrong block number: expected {expected}, got {got}")]
    WrongBlockNumber {
        /// The block number the ledger expected next.
        expected: BlockNo,
        /// The block number the caller supplied.
        got: BlockNo,
    },
}

/// The append-only sequence of decided items, plus the staging area of items
/// still waiting to be included in a block.
pub struct SequenceLedger<I: ConsensusItem> {
    next_bno: BlockNo,
    to_be_sequenced: BTreeSet<I>,
    sequence: BTreeSet<I>,
    old_blocks: Vec<Block<I>>,
}

impl<I: ConsensusItem> Default for SequenceLedger<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ConsensusItem> SequenceLedger<I> {
    /// An empty ledger starting at block 0.
    pub fn new() -> Self {
        Self {
            next_bno: 0,
            to_be_sequenced: BTreeSet::new(),
            sequence: BTreeSet::new(),
            old_blocks: Vec::new(),
        }
    }

    /// The block number the ledger is currently assembling.
    pub fn next_block_no(&self) -> BlockNo {
        self.next_bno
    }

    /// Every item across every committed block, in commit order (items within
    /// a block are yielded in their canonical, `Ord`-sorted order since a
    /// block is a `BTreeSet`).
    pub fn get_sequence(&self) -> impl Iterator<Item = &I> {
        self.old_blocks.iter().flatten()
    }

    /// Schedule `item` for inclusion in a future block. Idempotent: a no-op
    /// if the item is already sequenced or already staged.
    pub fn put_item(&mut self, item: I) {
        if !self.sequence.contains(&item) && !self.to_be_sequenced.contains(&item) {
            self.to_be_sequenced.insert(item);
        }
    }

    /// Validate that `block` is a legal proposal for `bno`: the block number
    /// must be the next expected one, and none of its items may already be
    /// committed. As a side effect (matching the reference implementation),
    /// every item in `block` is staged via [`put_item`](Self::put_item) so a
    /// peer that only observes this block still learns about its items.
    pub fn check_block(&mut self, bno: BlockNo, block: &Block<I>) -> bool {
        if bno != self.next_bno {
            return false;
        }
        for item in block {
            self.put_item(item.clone());
        }
        block.iter().all(|item| !self.sequence.contains(item))
    }

    /// Commit `block` as block number `bno`, moving its items from staging
    /// into the committed sequence and advancing the expected block number.
    pub fn set_block(&mut self, bno: BlockNo, block: Block<I>) -> Result<(), LedgerError> {
        if bno != self.next_bno {
            return Err(LedgerError::WrongBlockNumber {
                expected: self.next_bno,
                got: bno,
            });
        }

        self.sequence.extend(block.iter().cloned());
        self.to_be_sequenced.retain(|item| !block.contains(item));
        self.next_bno += 1;
        self.old_blocks.push(block);
        Ok(())
    }

    /// Build the next block proposal out of everything currently staged.
    pub fn new_block(&mut self, bno: BlockNo) -> Block<I> {
        let block: Block<I> = self.to_be_sequenced.clone();
        debug_assert!(self.check_block(bno, &block));
        block
    }
}
