//! Convergence properties for the replicated text buffer.
//!
//! These tests verify permutation-invariance: for a fixed set of edit
//! operations from N sites, every site materializes identical text no
//! matter the order (or multiplicity) of delivery.

use conclave_text::{EditOperation, SiteId, TextCrdt};
use proptest::prelude::*;

/// Apply a script of (start, deleted, text) splices, clamping the random
/// offsets into the buffer's current bounds.
fn apply_script(crdt: &mut TextCrdt, script: &[(usize, usize, String)]) -> Vec<EditOperation> {
    let mut ops = Vec::new();
    for (start, deleted, text) in script {
        let len = crdt.len();
        let start = start % (len + 1);
        let deleted = deleted % (len - start + 1);
        ops.push(
            crdt.splice(start, deleted, text)
                .expect("script splice within bounds"),
        );
    }
    ops
}

/// Deterministic Fisher-Yates driven by proptest-generated seeds.
fn shuffle<T>(items: &mut [T], seeds: &[usize]) {
    for i in (1..items.len()).rev() {
        let j = seeds[i % seeds.len()] % (i + 1);
        items.swap(i, j);
    }
}

fn script_strategy() -> impl Strategy<Value = Vec<(usize, usize, String)>> {
    prop::collection::vec((any::<usize>(), any::<usize>(), "[a-z]{0,4}"), 0..4)
}

proptest! {
    #[test]
    fn converges_under_any_delivery_order(
        initial in "[a-z\\n]{0,8}",
        scripts in prop::collection::vec(script_strategy(), 3),
        shuffles in prop::collection::vec(prop::collection::vec(any::<usize>(), 1..16), 3),
        redeliver in any::<bool>(),
    ) {
        let mut seed = TextCrdt::new(SiteId(1));
        seed.splice(0, 0, &initial).expect("initial splice");

        let mut sites: Vec<TextCrdt> = (0u32..3)
            .map(|i| TextCrdt::from_snapshot(SiteId(i + 2), seed.snapshot()))
            .collect();

        // Each site edits concurrently, without seeing the others.
        let mut ops_by_site: Vec<Vec<EditOperation>> = Vec::new();
        for (site, script) in sites.iter_mut().zip(&scripts) {
            ops_by_site.push(apply_script(site, script));
        }

        // Deliver every other site's operations in a per-receiver order.
        for (i, site) in sites.iter_mut().enumerate() {
            let mut inbound: Vec<&EditOperation> = ops_by_site
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .flat_map(|(_, ops)| ops.iter())
                .collect();
            shuffle(&mut inbound, &shuffles[i]);
            for op in inbound {
                site.integrate(op).expect("integration");
                if redeliver {
                    let changes = site.integrate(op).expect("redelivery");
                    prop_assert!(changes.is_empty());
                }
            }
        }

        let converged = sites[0].text();
        prop_assert_eq!(&converged, &sites[1].text());
        prop_assert_eq!(&converged, &sites[2].text());

        // Redelivering the full operation set changes nothing.
        for site in sites.iter_mut() {
            for ops in &ops_by_site {
                for op in ops {
                    site.integrate(op).expect("late redelivery");
                }
            }
            prop_assert_eq!(&site.text(), &converged);
        }
    }
}
