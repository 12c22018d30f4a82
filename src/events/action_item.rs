use rust_decimal::Decimal;

use crate::chain::Chain;
use crate::decoding::reshuffle::reshuffle;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Rewrite the matched event with the item's `to_*` fields.
    Transform,
    /// Drop the matched event.
    Skip,
    /// Leave the matched event alone and keep the item for later events.
    SkipAndKeep,
}

/// Where paired events go relative to the matched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairedPosition {
    Before,
    After,
}

/// A deferred instruction left by one decoder for an event appended later
/// in the same transaction.
#[derive(Debug, Clone)]
pub struct ActionItem<C: Chain> {
    pub action: ActionKind,
    pub from_event_type: HistoryEventType,
    pub from_event_subtype: HistoryEventSubType,
    /// Asset identifier to match on.
    pub asset: Option<String>,
    pub address: Option<C::Address>,
    pub amount: Option<Decimal>,
    /// Accept amounts strictly within this distance of `amount`.
    pub amount_error_tolerance: Option<Decimal>,
    pub location_label: Option<C::Address>,
    pub to_event_type: Option<HistoryEventType>,
    pub to_event_subtype: Option<HistoryEventSubType>,
    /// May contain `{amount}` and `{symbol}` placeholders.
    pub to_notes: Option<String>,
    pub to_counterparty: Option<String>,
    pub to_address: Option<C::Address>,
    pub to_location_label: Option<C::Address>,
    pub extra_data: Option<serde_json::Value>,
    /// Sequence indices of already decoded events to keep next to the match.
    pub paired_events: Vec<u64>,
    pub paired_position: PairedPosition,
    /// Pair the event this item matches with whatever the next item matches.
    pub pair_with_next: bool,
}

impl<C: Chain> ActionItem<C> {
    pub fn new(
        action: ActionKind,
        from_event_type: HistoryEventType,
        from_event_subtype: HistoryEventSubType,
    ) -> Self {
        Self {
            action,
            from_event_type,
            from_event_subtype,
            asset: None,
            address: None,
            amount: None,
            amount_error_tolerance: None,
            location_label: None,
            to_event_type: None,
            to_event_subtype: None,
            to_notes: None,
            to_counterparty: None,
            to_address: None,
            to_location_label: None,
            extra_data: None,
            paired_events: Vec::new(),
            paired_position: PairedPosition::After,
            pair_with_next: false,
        }
    }

    pub fn transform(
        from_event_type: HistoryEventType,
        from_event_subtype: HistoryEventSubType,
    ) -> Self {
        Self::new(ActionKind::Transform, from_event_type, from_event_subtype)
    }

    pub fn with_asset(mut self, identifier: impl Into<String>) -> Self {
        self.asset = Some(identifier.into());
        self
    }

    pub fn with_address(mut self, address: C::Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.amount_error_tolerance = Some(tolerance);
        self
    }

    pub fn with_location_label(mut self, label: C::Address) -> Self {
        self.location_label = Some(label);
        self
    }

    pub fn to_type(mut self, event_type: HistoryEventType, subtype: HistoryEventSubType) -> Self {
        self.to_event_type = Some(event_type);
        self.to_event_subtype = Some(subtype);
        self
    }

    pub fn to_notes(mut self, notes: impl Into<String>) -> Self {
        self.to_notes = Some(notes.into());
        self
    }

    pub fn to_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.to_counterparty = Some(counterparty.into());
        self
    }

    pub fn to_address(mut self, address: C::Address) -> Self {
        self.to_address = Some(address);
        self
    }

    pub fn paired_with(mut self, sequence_indices: Vec<u64>, position: PairedPosition) -> Self {
        self.paired_events = sequence_indices;
        self.paired_position = position;
        self
    }

    pub fn matches(&self, event: &HistoryEvent<C>) -> bool {
        if self.from_event_type != event.event_type
            || self.from_event_subtype != event.event_subtype
        {
            return false;
        }
        if let Some(asset) = &self.asset
            && *asset != event.asset.identifier
        {
            return false;
        }
        if let Some(label) = &self.location_label
            && event.location_label.as_ref() != Some(label)
        {
            return false;
        }
        if let Some(address) = &self.address
            && event.address.as_ref() != Some(address)
        {
            return false;
        }
        match (self.amount, self.amount_error_tolerance) {
            (None, _) => true,
            (Some(amount), _) if amount == event.amount => true,
            (Some(amount), Some(tolerance)) => (amount - event.amount).abs() < tolerance,
            (Some(_), None) => false,
        }
    }

    fn apply(&self, event: &mut HistoryEvent<C>) {
        if let Some(event_type) = self.to_event_type {
            event.event_type = event_type;
        }
        if let Some(subtype) = self.to_event_subtype {
            event.event_subtype = subtype;
        }
        if let Some(template) = &self.to_notes {
            event.notes = Some(
                template
                    .replace("{amount}", &event.amount.to_string())
                    .replace("{symbol}", &event.asset.symbol),
            );
        }
        if let Some(counterparty) = &self.to_counterparty {
            event.counterparty = Some(counterparty.clone());
        }
        if let Some(extra_data) = &self.extra_data {
            event.extra_data = Some(extra_data.clone());
        }
        if let Some(address) = self.to_address {
            event.address = Some(address);
        }
        if let Some(label) = self.to_location_label {
            event.location_label = Some(label);
        }
    }
}

/// Matches `event` against the pending items in insertion order and appends
/// it to `decoded_events` unless a `Skip` item consumed it.
///
/// The first matching `Transform` or `Skip` item is removed. A transform with
/// paired events reorders them next to the appended event.
pub fn append_with_action_items<C: Chain>(
    action_items: &mut Vec<ActionItem<C>>,
    mut event: HistoryEvent<C>,
    decoded_events: &mut Vec<HistoryEvent<C>>,
) {
    let matched = action_items
        .iter()
        .position(|item| item.action != ActionKind::SkipAndKeep && item.matches(&event));
    let Some(idx) = matched else {
        decoded_events.push(event);
        return;
    };
    let item = action_items.remove(idx);
    if item.action == ActionKind::Skip {
        return;
    }

    item.apply(&mut event);
    if item.pair_with_next {
        if let Some(next) = action_items.get_mut(idx) {
            next.paired_events = vec![event.sequence_index];
            next.paired_position = PairedPosition::Before;
        } else {
            tracing::error!(
                tx = %event.group_identifier,
                "action item asked to pair with the next item but none is left"
            );
        }
    }

    let anchors: Vec<Option<u64>> = if item.paired_events.is_empty() {
        Vec::new()
    } else {
        let own = std::iter::once(Some(event.sequence_index));
        let paired = item.paired_events.iter().copied().map(Some);
        match item.paired_position {
            PairedPosition::Before => paired.chain(own).collect(),
            PairedPosition::After => own.chain(paired).collect(),
        }
    };
    decoded_events.push(event);
    if !anchors.is_empty() {
        reshuffle(&anchors, decoded_events);
    }
}
