//! DEX aggregator router on top of the AMM pools. The router emits no logs
//! of its own; it is recognized by the transaction's `to` address and its
//! rule folds the per-pool legs into one swap.

use std::collections::{HashMap, HashSet};

use alloy_primitives::Address;

use crate::chain::evm::Evm;
use crate::decoding::interface::{CounterpartyDetails, Decoder, PostDecodingRule};
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType};
use crate::protocols::{CPT_AGGREGATOR, CPT_AMM, is_trade_leg_of, trade_leg_notes};

const VENUE: &str = "via aggregator";

pub struct AggregatorDecoder {
    router: Address,
}

impl AggregatorDecoder {
    pub fn new(router: Address) -> Self {
        Self { router }
    }
}

impl Decoder<Evm> for AggregatorDecoder {
    fn name(&self) -> &'static str {
        "Aggregator"
    }

    fn counterparties(&self) -> Vec<CounterpartyDetails> {
        vec![CounterpartyDetails::new(CPT_AGGREGATOR, "Aggregator")]
    }

    fn addresses_to_counterparties(&self) -> HashMap<Address, String> {
        HashMap::from([(self.router, CPT_AGGREGATOR.to_owned())])
    }

    /// Runs ahead of default-priority rules so they see the folded swap.
    fn post_decoding_rules(&self) -> HashMap<String, Vec<PostDecodingRule<Evm>>> {
        let router = self.router;
        HashMap::from([(
            CPT_AGGREGATOR.to_owned(),
            vec![PostDecodingRule::new(-1, move |_, events| {
                collapse_hops(events, router)
            })],
        )])
    }
}

/// Keeps the spends of assets no hop received and the receives of assets
/// no hop spent, retagged to the aggregator. Intermediate legs are dropped.
pub fn collapse_hops(
    events: Vec<HistoryEvent<Evm>>,
    router: Address,
) -> Result<Vec<HistoryEvent<Evm>>, Error> {
    let (legs, mut rest): (Vec<_>, Vec<_>) = events
        .into_iter()
        .partition(|event| is_trade_leg_of(event, CPT_AMM));
    if legs.is_empty() {
        return Ok(rest);
    }

    let assets_of = |subtype: HistoryEventSubType| -> HashSet<String> {
        legs.iter()
            .filter(|leg| leg.event_subtype == subtype)
            .map(|leg| leg.asset.identifier.clone())
            .collect()
    };
    let spent = assets_of(HistoryEventSubType::Spend);
    let received = assets_of(HistoryEventSubType::Receive);

    let mut kept = Vec::new();
    for mut leg in legs {
        let intermediate = match leg.event_subtype {
            HistoryEventSubType::Spend => received.contains(&leg.asset.identifier),
            _ => spent.contains(&leg.asset.identifier),
        };
        if intermediate {
            continue;
        }
        leg.counterparty = Some(CPT_AGGREGATOR.to_owned());
        leg.address = Some(router);
        leg.notes = Some(trade_leg_notes(leg.event_subtype, leg.amount, &leg.asset, VENUE));
        kept.push(leg);
    }

    let has = |subtype| kept.iter().any(|leg: &HistoryEvent<Evm>| leg.event_subtype == subtype);
    if !has(HistoryEventSubType::Spend) || !has(HistoryEventSubType::Receive) {
        return Err(Error::rule(format!(
            "aggregated swap through {router} has no net spend or receive"
        )));
    }

    rest.extend(kept);
    rest.sort_by_key(|event| event.sequence_index);
    Ok(rest)
}
