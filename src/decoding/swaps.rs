//! Groups `TRADE` legs into swaps at the end of a decoding run.

use crate::chain::Chain;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};

const TRADE_SUBTYPES: [HistoryEventSubType; 3] = [
    HistoryEventSubType::Spend,
    HistoryEventSubType::Receive,
    HistoryEventSubType::Fee,
];

fn is_trade_leg<C: Chain>(event: &HistoryEvent<C>, subtype: HistoryEventSubType) -> bool {
    event.event_type == HistoryEventType::Trade && event.event_subtype == subtype
}

/// Expects every swap laid out in sequence index order as spend legs, then
/// receive legs, then optional fee legs, with nothing in between.
///
/// Each complete group gets consecutive indices starting at its first spend
/// and inherits the spend's counterparty and address. Groups with more than
/// one leg of a kind become `MULTI_TRADE`. Incomplete groups are logged and
/// kept unchanged.
pub fn process_swaps<C: Chain>(mut events: Vec<HistoryEvent<C>>) -> Vec<HistoryEvent<C>> {
    events.sort_by_key(|event| event.sequence_index);
    let mut processed = Vec::with_capacity(events.len());
    let mut iter = events.into_iter().peekable();

    while let Some(next) = iter.peek() {
        if next.event_type != HistoryEventType::Trade
            || !TRADE_SUBTYPES.contains(&next.event_subtype)
        {
            processed.extend(iter.next());
            continue;
        }

        let mut group: Vec<HistoryEvent<C>> = Vec::new();
        let mut event_type = HistoryEventType::Trade;
        let mut complete = true;
        for subtype in TRADE_SUBTYPES {
            let mut legs = Vec::new();
            while let Some(leg) = iter.next_if(|event| is_trade_leg(event, subtype)) {
                legs.push(leg);
            }
            if legs.len() > 1 {
                event_type = HistoryEventType::MultiTrade;
            } else if legs.is_empty() && subtype != HistoryEventSubType::Fee {
                tracing::error!(
                    tx = ?iter.peek().map(|event| &event.group_identifier),
                    missing = subtype.as_ref(),
                    matched = group.len(),
                    "encountered incomplete or unordered swap event group"
                );
                if group.is_empty() {
                    processed.extend(iter.next());
                } else {
                    processed.append(&mut group);
                }
                complete = false;
                break;
            }
            group.extend(legs);
        }
        if !complete {
            continue;
        }
        processed.extend(finalize_group(group, event_type));
    }

    processed
}

fn finalize_group<C: Chain>(
    mut group: Vec<HistoryEvent<C>>,
    event_type: HistoryEventType,
) -> Vec<HistoryEvent<C>> {
    let Some(spend) = group.first() else {
        return group;
    };
    let start = spend.sequence_index;
    let counterparty = spend.counterparty.clone();
    let address = spend.address;
    let location_label = spend.location_label;

    for (offset, event) in (0u64..).zip(group.iter_mut()) {
        event.sequence_index = start + offset;
        event.event_type = event_type;
        event.counterparty.clone_from(&counterparty);
        event.address = address;
        if event.location_label.is_none() {
            event.location_label = location_label;
        }
    }
    group
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::chain::Location;
    use crate::chain::evm::Evm;
    use crate::types::Asset;
    use alloy_primitives::{Address, B256};
    use rust_decimal::Decimal;

    fn leg(seq: u64, event_type: HistoryEventType, subtype: HistoryEventSubType) -> HistoryEvent<Evm> {
        HistoryEvent {
            group_identifier: B256::ZERO,
            sequence_index: seq,
            timestamp: 0,
            location: Location::Ethereum,
            event_type,
            event_subtype: subtype,
            asset: Asset::new("ETH", "ETH", 18),
            amount: Decimal::ONE,
            location_label: None,
            notes: None,
            counterparty: None,
            address: None,
            extra_data: None,
        }
    }

    #[test]
    fn complete_group_becomes_consecutive_and_inherits_spend_metadata() {
        let router = Address::repeat_byte(9);
        let spend = leg(1, HistoryEventType::Trade, HistoryEventSubType::Spend)
            .with_counterparty("amm")
            .with_address(router)
            .with_location_label(Address::repeat_byte(1));
        let events = vec![
            leg(0, HistoryEventType::Spend, HistoryEventSubType::Fee),
            spend,
            leg(4, HistoryEventType::Trade, HistoryEventSubType::Receive),
            leg(7, HistoryEventType::Trade, HistoryEventSubType::Fee),
        ];
        let out = process_swaps(events);
        let indices: Vec<u64> = out.iter().map(|e| e.sequence_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(out[1..].iter().all(|e| e.counterparty.as_deref() == Some("amm")));
        assert!(out[1..].iter().all(|e| e.address == Some(router)));
        assert_eq!(out[2].location_label, Some(Address::repeat_byte(1)));
        assert_eq!(out[2].event_type, HistoryEventType::Trade);
    }

    #[test]
    fn repeated_legs_mark_multi_trade() {
        let events = vec![
            leg(1, HistoryEventType::Trade, HistoryEventSubType::Spend),
            leg(2, HistoryEventType::Trade, HistoryEventSubType::Spend),
            leg(3, HistoryEventType::Trade, HistoryEventSubType::Receive),
        ];
        let out = process_swaps(events);
        assert!(out.iter().all(|e| e.event_type == HistoryEventType::MultiTrade));
    }

    #[test]
    fn incomplete_group_is_left_alone() {
        let events = vec![
            leg(1, HistoryEventType::Trade, HistoryEventSubType::Spend).with_counterparty("x"),
            leg(5, HistoryEventType::Informational, HistoryEventSubType::None),
            leg(9, HistoryEventType::Trade, HistoryEventSubType::Receive),
        ];
        let out = process_swaps(events.clone());
        assert_eq!(out, events);
    }

    #[test]
    fn adjacent_groups_are_processed_independently() {
        let events = vec![
            leg(1, HistoryEventType::Trade, HistoryEventSubType::Spend),
            leg(3, HistoryEventType::Trade, HistoryEventSubType::Receive),
            leg(4, HistoryEventType::Trade, HistoryEventSubType::Receive),
            leg(5, HistoryEventType::Informational, HistoryEventSubType::None),
            leg(6, HistoryEventType::Trade, HistoryEventSubType::Spend),
            leg(8, HistoryEventType::Trade, HistoryEventSubType::Receive),
        ];
        let out = process_swaps(events);
        let indices: Vec<u64> = out.iter().map(|e| e.sequence_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 5, 6, 7]);
        assert_eq!(out.first().unwrap().event_type, HistoryEventType::MultiTrade);
        assert_eq!(out[4].event_type, HistoryEventType::Trade);
        assert_eq!(out[5].event_type, HistoryEventType::Trade);
    }
}
