use std::collections::HashSet;

use crate::chain::Chain;
use crate::events::{ActionItem, HistoryEvent};

/// What a single decoding function hands back to the orchestrator.
///
/// The default value means "nothing decoded" and leaves the run untouched.
#[derive(Debug)]
pub struct DecodingOutput<C: Chain> {
    pub event: Option<HistoryEvent<C>>,
    pub action_items: Vec<ActionItem<C>>,
    /// Balances of the involved accounts need refreshing after this tx.
    pub refresh_balances: bool,
    /// Decoders whose cached data is stale after this tx.
    pub reload_decoders: Option<HashSet<String>>,
    /// Counterparty whose post-decoding rules must run even if no event
    /// carries it as a tag.
    pub matched_counterparty: Option<String>,
    /// Request the swap grouping pass at the end of the run.
    pub process_swaps: bool,
}

impl<C: Chain> Default for DecodingOutput<C> {
    fn default() -> Self {
        Self {
            event: None,
            action_items: Vec::new(),
            refresh_balances: false,
            reload_decoders: None,
            matched_counterparty: None,
            process_swaps: false,
        }
    }
}

impl<C: Chain> DecodingOutput<C> {
    pub fn with_event(event: HistoryEvent<C>) -> Self {
        Self {
            event: Some(event),
            ..Self::default()
        }
    }

    pub fn with_action_items(action_items: Vec<ActionItem<C>>) -> Self {
        Self {
            action_items,
            ..Self::default()
        }
    }

    pub fn reload(decoders: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            reload_decoders: Some(decoders.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn swaps(mut self) -> Self {
        self.process_swaps = true;
        self
    }

    pub fn matched(mut self, counterparty: impl Into<String>) -> Self {
        self.matched_counterparty = Some(counterparty.into());
        self
    }

    /// True when the output carries nothing the orchestrator would act on.
    pub fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.action_items.is_empty()
            && !self.refresh_balances
            && self.reload_decoders.is_none()
            && self.matched_counterparty.is_none()
            && !self.process_swaps
    }
}
