pub mod action_item;

use rust_decimal::Decimal;

use crate::chain::{Chain, Location};
use crate::types::{Asset, TimestampMs};

pub use action_item::{ActionItem, ActionKind, PairedPosition};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventType {
    Trade,
    MultiTrade,
    Spend,
    Receive,
    Transfer,
    Deposit,
    Withdrawal,
    Informational,
    Fail,
    Deploy,
}

impl HistoryEventType {
    /// Types that move value away from a tracked account.
    pub fn is_outgoing(self) -> bool {
        matches!(self, Self::Spend | Self::Transfer | Self::Deposit)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventSubType {
    None,
    Fee,
    Spend,
    Receive,
    Approve,
    DepositAsset,
    RemoveAsset,
    Reward,
    ReceiveWrapped,
    ReturnWrapped,
    Delegate,
}

/// A canonical accounting event produced by decoding.
///
/// All events of one transaction share `group_identifier`; within the
/// group `sequence_index` is unique.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(bound = "")]
pub struct HistoryEvent<C: Chain> {
    #[serde(serialize_with = "crate::types::serialize_display")]
    pub group_identifier: C::TxRef,
    pub sequence_index: u64,
    pub timestamp: TimestampMs,
    pub location: Location,
    pub event_type: HistoryEventType,
    pub event_subtype: HistoryEventSubType,
    pub asset: Asset,
    pub amount: Decimal,
    /// Tracked account the event is booked against.
    #[serde(serialize_with = "crate::types::serialize_opt_display")]
    pub location_label: Option<C::Address>,
    pub notes: Option<String>,
    pub counterparty: Option<String>,
    /// The other side of the movement.
    #[serde(serialize_with = "crate::types::serialize_opt_display")]
    pub address: Option<C::Address>,
    pub extra_data: Option<serde_json::Value>,
}

impl<C: Chain> HistoryEvent<C> {
    pub fn with_location_label(mut self, label: impl Into<Option<C::Address>>) -> Self {
        self.location_label = label.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<Option<C::Address>>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    pub fn with_extra_data(mut self, extra_data: serde_json::Value) -> Self {
        self.extra_data = Some(extra_data);
        self
    }

    pub fn is_type(&self, event_type: HistoryEventType, subtype: HistoryEventSubType) -> bool {
        self.event_type == event_type && self.event_subtype == subtype
    }
}

/// True when no two events share a sequence index.
pub fn has_unique_sequence_indices<C: Chain>(events: &[HistoryEvent<C>]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(events.len());
    events.iter().all(|event| seen.insert(event.sequence_index))
}
