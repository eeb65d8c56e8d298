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

//! An in-process N-peer demo: every peer round-trips its outgoing messages
//! through a byte-level codec over an in-memory [`LoopbackTransport`], and
//! `advance_round`/`get_messages`/`put_messages` are driven round-robin until
//! every peer has chained through a target number of blocks. Mirrors
//! `dlsconsensus/tests/test_net.py::test_many_load`.

use dlschain::core::consensus::driver::PeerDriver;
use dlschain::core::signer::Sha256MacSigner;
use dlschain::core::types::{decode_canonical_limited, encode_canonical, DEFAULT_MAX_WIRE_BYTES};
use dlschain::transport::{LoopbackTransport, Transport};
use tracing::info;

type Item = String;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let addrs: Vec<String> = (0..4).map(|i| format!("peer-{i}")).collect();
    let pubs: Vec<Vec<u8>> = addrs.iter().map(|a| a.as_bytes().to_vec()).collect();
    let transport = LoopbackTransport::new();
    for a in &addrs {
        transport.register(a);
    }

    let mut peers: Vec<PeerDriver<Item, Sha256MacSigner>> = (0..addrs.len() as u32)
        .map(|i| {
            PeerDriver::new(
                i,
                addrs.clone(),
                pubs.clone(),
                "demo-channel".to_string(),
                0,
                Sha256MacSigner,
            )
        })
        .collect();

    for (i, p) in peers.iter_mut().enumerate() {
        p.put_sequence(format!("M{}", addrs[i]));
    }

    const TARGET_BLOCK_NO: u64 = 10;
    let mut rounds = 0;

    for r in 0..2000 {
        rounds = r;
        for i in 0..peers.len() {
            peers[i].advance_round(None).expect("advance_round");
            let outgoing = peers[i].get_messages();
            for (dest, msg) in outgoing {
                let bytes = encode_canonical(&msg).expect("encode outgoing message");
                transport.send(&dest, bytes).expect("loopback send");
            }
        }

        for (i, addr) in addrs.iter().enumerate() {
            let inbox = transport.drain(addr);
            let decoded: Vec<_> = inbox
                .into_iter()
                .filter_map(|bytes| {
                    decode_canonical_limited(&bytes, DEFAULT_MAX_WIRE_BYTES).ok()
                })
                .collect();
            peers[i].put_messages(decoded).expect("put_messages");
        }

        if peers.iter().all(|p| p.current_block_no() == TARGET_BLOCK_NO) {
            break;
        }
    }

    info!(rounds, "simulation converged");
    for (addr, p) in addrs.iter().zip(&peers) {
        info!(
            peer = %addr,
            block_no = p.current_block_no(),
            sequence = ?p.get_sequence(),
            "final state"
        );
    }

    let first_sequence = peers[0].get_sequence();
    for p in &peers[1..] {
        assert_eq!(
            p.get_sequence(),
            first_sequence,
            "all peers must agree on the committed sequence"
        );
    }
}
