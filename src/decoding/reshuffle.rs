use std::collections::HashSet;

use crate::chain::Chain;
use crate::events::HistoryEvent;

/// Moves the events whose sequence indices are listed in `anchors` so they
/// sit next to each other, in the given order, starting where the first of
/// them currently sits.
///
/// The anchors swap their sequence indices among themselves so that index
/// order matches the requested order. Absent anchors (`None`, or an index no
/// event carries) are ignored, as are repeats. Non-anchor events keep their
/// indices and relative order.
pub fn reshuffle<C: Chain>(anchors: &[Option<u64>], events: &mut Vec<HistoryEvent<C>>) {
    let present: HashSet<u64> = events.iter().map(|event| event.sequence_index).collect();
    let mut seen = HashSet::new();
    let ordered: Vec<u64> = anchors
        .iter()
        .flatten()
        .copied()
        .filter(|index| present.contains(index) && seen.insert(*index))
        .collect();
    if ordered.len() < 2 {
        return;
    }

    let Some(insert_at) = events
        .iter()
        .position(|event| seen.contains(&event.sequence_index))
    else {
        return;
    };

    let (mut moved, mut rest): (Vec<_>, Vec<_>) = std::mem::take(events)
        .into_iter()
        .partition(|event| seen.contains(&event.sequence_index));

    let mut indices = ordered.clone();
    indices.sort_unstable();
    moved.sort_by_key(|event| {
        ordered
            .iter()
            .position(|index| *index == event.sequence_index)
    });
    for (event, index) in moved.iter_mut().zip(indices) {
        event.sequence_index = index;
    }

    let tail = rest.split_off(insert_at);
    rest.extend(moved);
    rest.extend(tail);
    *events = rest;
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::chain::Location;
    use crate::chain::evm::Evm;
    use crate::events::{HistoryEventSubType, HistoryEventType};
    use crate::types::Asset;
    use alloy_primitives::B256;
    use rust_decimal::Decimal;

    fn events(indices: &[u64]) -> Vec<HistoryEvent<Evm>> {
        indices
            .iter()
            .map(|&index| HistoryEvent {
                group_identifier: B256::ZERO,
                sequence_index: index,
                timestamp: 0,
                location: Location::Ethereum,
                event_type: HistoryEventType::Informational,
                event_subtype: HistoryEventSubType::None,
                asset: Asset::new("ETH", "ETH", 18),
                amount: Decimal::ZERO,
                location_label: None,
                notes: Some(format!("e{index}")),
                counterparty: None,
                address: None,
                extra_data: None,
            })
            .collect()
    }

    fn notes(events: &[HistoryEvent<Evm>]) -> Vec<String> {
        events.iter().map(|e| e.notes.clone().unwrap()).collect()
    }

    fn indices(events: &[HistoryEvent<Evm>]) -> Vec<u64> {
        events.iter().map(|e| e.sequence_index).collect()
    }

    #[test]
    fn reorders_anchors_and_swaps_their_indices() {
        let mut list = events(&[0, 1, 2, 3]);
        reshuffle(&[Some(3), Some(1)], &mut list);
        assert_eq!(notes(&list), vec!["e0", "e3", "e1", "e2"]);
        assert_eq!(indices(&list), vec![0, 1, 3, 2]);
    }

    #[test]
    fn missing_anchors_are_ignored() {
        let mut list = events(&[0, 1, 2]);
        reshuffle(&[None, Some(2), Some(9), Some(0)], &mut list);
        assert_eq!(notes(&list), vec!["e2", "e0", "e1"]);
        assert_eq!(indices(&list), vec![0, 2, 1]);
    }

    #[test]
    fn single_anchor_is_a_no_op() {
        let mut list = events(&[4, 2, 7]);
        let before = list.clone();
        reshuffle(&[Some(2), None], &mut list);
        assert_eq!(list, before);
    }

    /// Deterministic LCG so the property loop is reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            self.0 >> 33
        }
    }

    #[test]
    fn randomized_reshuffle_keeps_membership_and_anchor_order() {
        let mut rng = Lcg(0x5eed);
        for _ in 0..500 {
            let len = (rng.next() % 8 + 1) as usize;
            let mut pool: Vec<u64> = (0..20).collect();
            let mut chosen = Vec::with_capacity(len);
            for _ in 0..len {
                let pick = (rng.next() as usize) % pool.len();
                chosen.push(pool.swap_remove(pick));
            }
            let original = events(&chosen);
            let mut list = original.clone();

            let anchor_count = rng.next() % 4;
            let anchors: Vec<Option<u64>> = (0..anchor_count)
                .map(|_| match rng.next() % 5 {
                    0 => None,
                    1 => Some(100 + rng.next() % 5),
                    _ => Some(chosen[(rng.next() as usize) % chosen.len()]),
                })
                .collect();
            reshuffle(&anchors, &mut list);

            let mut before_notes = notes(&original);
            let mut after_notes = notes(&list);
            before_notes.sort();
            after_notes.sort();
            assert_eq!(before_notes, after_notes);

            let mut before_indices = indices(&original);
            let mut after_indices = indices(&list);
            before_indices.sort_unstable();
            after_indices.sort_unstable();
            assert_eq!(before_indices, after_indices);

            let mut seen = HashSet::new();
            let present: Vec<String> = anchors
                .iter()
                .flatten()
                .filter(|index| chosen.contains(index) && seen.insert(**index))
                .map(|index| format!("e{index}"))
                .collect();
            if present.len() >= 2 {
                let positions: Vec<usize> = present
                    .iter()
                    .map(|note| list.iter().position(|e| e.notes.as_ref() == Some(note)).unwrap())
                    .collect();
                assert!(positions.windows(2).all(|w| w[1] == w[0] + 1));
                let anchor_indices: Vec<u64> = positions.iter().map(|&p| list[p].sequence_index).collect();
                assert!(anchor_indices.windows(2).all(|w| w[0] < w[1]));
            }

            for event in original.iter().filter(|e| {
                !seen.contains(&e.sequence_index)
            }) {
                let after = list.iter().find(|e| e.notes == event.notes).unwrap();
                assert_eq!(after.sequence_index, event.sequence_index);
            }
        }
    }
}
