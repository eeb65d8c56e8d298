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

//! Property tests for the six core invariants: safety, `find_seen`
//! monotonicity, the one-lock-per-honest-sweep bound, decision
//! monotonicity, wire codec round-trips, and checkpoint round-trips.

use dlschain::core::consensus::checkpoint::{Checkpointer, FileCheckpointSink};
use dlschain::core::consensus::dls::{DlsSnapshot, DlsStateMachine, IdentityPackager};
use dlschain::core::message::{InternalMsg, Phase0Msg, WireAcceptable, WireAsk, WireDecision};
use dlschain::core::types::{decode_canonical_limited, encode_canonical, DEFAULT_MAX_WIRE_BYTES};
use proptest::collection::{btree_set, vec as pvec};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::tempdir;

fn machine(id: u32, value: &str, n: u32) -> DlsStateMachine<String> {
    DlsStateMachine::new(id, value.to_string(), n, 0, Box::new(IdentityPackager))
}

fn run_round(peers: &mut [DlsStateMachine<String>], silent: &BTreeSet<usize>) {
    let mut all_messages: Vec<InternalMsg<String>> = Vec::new();
    for (i, p) in peers.iter_mut().enumerate() {
        p.process_round(true).unwrap();
        if !silent.contains(&i) {
            all_messages.extend(p.get_messages());
        }
    }
    for p in peers.iter_mut() {
        p.put_messages(all_messages.clone()).unwrap();
    }
}

fn short_id() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Invariant 1: two non-faulty peers who both reach a decision agree on
    /// the same item, even with up to `f` peers silent throughout.
    #[test]
    fn invariant1_safety_under_up_to_f_silent_peers(n in 4u32..8, seed in 0u64..1000) {
        let f = (n - 1) / 3;
        let silent: BTreeSet<usize> = if f == 0 {
            BTreeSet::new()
        } else {
            BTreeSet::from([(seed % f as u64) as usize])
        };

        let mut peers: Vec<DlsStateMachine<String>> = (0..n)
            .map(|i| machine(i, &format!("v{i}"), n))
            .collect();

        for _ in 0..60 {
            run_round(&mut peers, &silent);
        }

        let decided: BTreeSet<String> = peers
            .iter()
            .enumerate()
            .filter(|(i, _)| !silent.contains(i))
            .filter_map(|(_, p)| p.decision().cloned())
            .collect();
        prop_assert!(decided.len() <= 1, "non-faulty peers disagree: {:?}", decided);
    }

    /// Invariant 2: `find_seen` only ever grows `all_seen` (monotonic union),
    /// regardless of what acceptable sets arrive or in what order.
    #[test]
    fn invariant2_find_seen_is_monotonic(
        batches in pvec(btree_set(short_id(), 0..4), 0..6),
    ) {
        let mut m = machine(0, "seed", 4);
        let mut previous = m.get_acceptable().unwrap();

        for (round, batch) in batches.into_iter().enumerate() {
            m.put_messages(vec![InternalMsg::Phase0(Phase0Msg {
                acceptable: batch,
                phase: round as u64,
                sender: 1,
                raw: None,
            })])
            .unwrap();
            m.find_seen();
            let current = m.get_acceptable().unwrap();
            prop_assert!(
                previous.is_subset(&current),
                "all_seen shrank: {:?} -> {:?}",
                previous,
                current
            );
            previous = current;
        }
    }

    /// Invariant 3: after every honest peer has run a LOCKRELEASE3 sweep, no
    /// peer holds more than one lock (absent Byzantine double-locking, which
    /// is covered separately by the s3 scenario test).
    #[test]
    fn invariant3_at_most_one_lock_after_honest_sweep(n in 4u32..7) {
        let mut peers: Vec<DlsStateMachine<String>> = (0..n)
            .map(|i| machine(i, &format!("v{i}"), n))
            .collect();

        for _ in 0..40 {
            run_round(&mut peers, &BTreeSet::new());
        }

        for p in &peers {
            prop_assert!(p.locks_len() <= 1, "peer held {} locks", p.locks_len());
        }
    }

    /// Invariant 4: once a peer decides, running further rounds (with
    /// whatever further messages arrive) never changes that decision.
    #[test]
    fn invariant4_decision_never_reverts(n in 4u32..7, extra_rounds in 0u32..20) {
        let mut peers: Vec<DlsStateMachine<String>> = (0..n)
            .map(|i| machine(i, &format!("v{i}"), n))
            .collect();

        for _ in 0..40 {
            run_round(&mut peers, &BTreeSet::new());
            if peers.iter().all(|p| p.decision().is_some()) {
                break;
            }
        }

        let decided_at_first: Vec<Option<String>> =
            peers.iter().map(|p| p.decision().cloned()).collect();

        for _ in 0..extra_rounds {
            run_round(&mut peers, &BTreeSet::new());
        }

        for (p, before) in peers.iter().zip(decided_at_first.iter()) {
            if let Some(b) = before {
                prop_assert_eq!(p.decision(), Some(b));
            }
        }
    }

    /// Invariant 5: any wire message, once signed (or left unsigned),
    /// round-trips byte-for-byte through the canonical codec.
    #[test]
    fn invariant5_wire_acceptable_round_trips(
        channel in short_id(),
        sender in short_id(),
        bno in any::<u64>(),
        phase in any::<u64>(),
        blocks in pvec(btree_set(short_id(), 0..3), 0..3),
        signature in proptest::option::of(pvec(any::<u8>(), 0..16)),
    ) {
        let blocks: BTreeSet<BTreeSet<String>> = blocks.into_iter().collect();
        let msg = WireAcceptable::<String> { channel, sender, bno, phase, blocks, signature };

        let encoded_once = encode_canonical(&msg).unwrap();
        let encoded_twice = encode_canonical(&msg).unwrap();
        prop_assert_eq!(&encoded_once, &encoded_twice, "encoding is not deterministic");

        let decoded: WireAcceptable<String> =
            decode_canonical_limited(&encoded_once, DEFAULT_MAX_WIRE_BYTES).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    /// Invariant 5, continued: the same holds for DECISION and ASK, the two
    /// variants with no `phase`/`evidence` fields.
    #[test]
    fn invariant5_wire_decision_and_ask_round_trip(
        channel in short_id(),
        sender in short_id(),
        bno in any::<u64>(),
        block in btree_set(short_id(), 0..4),
    ) {
        let decision = WireDecision::<String> {
            channel: channel.clone(),
            sender: sender.clone(),
            bno,
            block,
            signature: None,
        };
        let encoded = encode_canonical(&decision).unwrap();
        let decoded: WireDecision<String> =
            decode_canonical_limited(&encoded, DEFAULT_MAX_WIRE_BYTES).unwrap();
        prop_assert_eq!(decoded, decision);

        let ask = WireAsk { channel, sender, bno };
        let encoded = encode_canonical(&ask).unwrap();
        let decoded: WireAsk = decode_canonical_limited(&encoded, DEFAULT_MAX_WIRE_BYTES).unwrap();
        prop_assert_eq!(decoded, ask);
    }

    /// Invariant 6: a snapshot persisted across redundant sinks recovers
    /// byte-identical, for arbitrary round numbers and `all_seen` contents.
    #[test]
    fn invariant6_checkpoint_round_trips(
        round in any::<u64>(),
        all_seen_extra in btree_set(short_id(), 0..5),
        decision in proptest::option::of(short_id()),
    ) {
        let dir = tempdir().unwrap();
        let sinks: Vec<Box<dyn dlschain::core::consensus::checkpoint::CheckpointSink>> = vec![
            Box::new(FileCheckpointSink::new(dir.path().join("a.chk"))),
            Box::new(FileCheckpointSink::new(dir.path().join("b.chk"))),
        ];
        let checkpointer: Checkpointer<String> = Checkpointer::new(sinks);

        let mut all_seen = all_seen_extra;
        all_seen.insert("seed".to_string());

        let snapshot = DlsSnapshot {
            my_id: 0,
            my_value: "seed".to_string(),
            n: 4,
            all_seen,
            round,
            locks: Default::default(),
            decision,
        };

        checkpointer.persist(&snapshot).unwrap();
        let recovered = checkpointer.recover().unwrap();
        prop_assert_eq!(recovered, snapshot);
    }
}
