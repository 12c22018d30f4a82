use std::collections::BTreeSet;

use crate::chain::{Chain, ChainTransaction};
use crate::collaborators::MessageAggregator;
use crate::decoding::interface::PostDecodingContext;
use crate::decoding::rules::DecodingRules;
use crate::events::{HistoryEvent, has_unique_sequence_indices};

/// Runs every rule registered for an observed counterparty in priority
/// order. Each rule works on a copy of the events; the copy replaces the
/// list only if the rule succeeds and keeps sequence indices unique.
///
/// Returns the resulting events and whether any rule was applied.
pub(crate) fn run_all_post_decoding_rules<C: Chain>(
    rules: &DecodingRules<C>,
    ctx: &mut PostDecodingContext<'_, '_, C>,
    mut events: Vec<HistoryEvent<C>>,
    counterparties: &BTreeSet<String>,
    msg_aggregator: &dyn MessageAggregator,
) -> (Vec<HistoryEvent<C>>, bool) {
    let mut applied = false;
    for (counterparty, rule) in rules.rules_for(counterparties) {
        let result = rule.apply(ctx, events.clone());
        match result {
            Ok(next) if has_unique_sequence_indices(&next) => {
                events = next;
                applied = true;
            }
            Ok(_) => {
                tracing::error!(
                    chain = C::LOCATION.as_ref(),
                    tx = %ctx.transaction.tx_ref(),
                    counterparty,
                    priority = rule.priority,
                    "post-decoding rule produced duplicate sequence indices, discarding its changes"
                );
            }
            Err(e) => {
                tracing::error!(
                    chain = C::LOCATION.as_ref(),
                    tx = %ctx.transaction.tx_ref(),
                    counterparty,
                    priority = rule.priority,
                    error = %e,
                    "post-decoding rule failed, discarding its changes"
                );
                msg_aggregator.add_error(&format!(
                    "Post-decoding of transaction {} in {} failed for {counterparty}. \
                     Check logs for more details",
                    ctx.transaction.tx_ref(),
                    C::LOCATION,
                ));
            }
        }
    }
    (events, applied)
}
