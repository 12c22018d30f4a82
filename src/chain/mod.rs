//! Chain abstraction. The decoding engine is written once against [`Chain`];
//! each supported chain plugs in its address type, raw units and the
//! chain-specific passes (pre-decoding, built-in rules).

pub mod evm;
pub mod solana;

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::decoding::interface::DecoderContext;
use crate::decoding::output::DecodingOutput;
use crate::decoding::tools::DecoderTools;
use crate::error::Error;
use crate::events::HistoryEvent;
use crate::types::{Asset, TimestampMs};

/// Counterparty of fee events.
pub const CPT_GAS: &str = "gas";

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
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Ethereum,
    Solana,
}

/// Built-in fallback rule tried on units no route produced an event for.
pub type BuiltinRule<C> =
    fn(&mut DecoderContext<'_, '_, C>) -> Result<DecodingOutput<C>, Error>;

/// Events emitted before any decoder runs, plus the unit indices those
/// events already account for.
pub struct PreDecodingOutput<C: Chain> {
    pub events: Vec<HistoryEvent<C>>,
    pub consumed_units: HashSet<u64>,
}

impl<C: Chain> Default for PreDecodingOutput<C> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            consumed_units: HashSet::new(),
        }
    }
}

pub trait Chain: fmt::Debug + Clone + Copy + PartialEq + Eq + Send + Sync + 'static {
    type Address: Copy + Eq + Ord + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;
    type TxRef: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;
    type Unit: RawUnit<Self>;
    type Transaction: ChainTransaction<Self>;

    const LOCATION: Location;

    /// The chain's fee and value asset.
    fn native_asset() -> Asset;

    fn parse_address(value: &str) -> Result<Self::Address, Error>;

    /// Fee and native-transfer pass run before any decoder sees the units.
    fn pre_decode(
        tools: &mut DecoderTools<'_, Self>,
        tx: &Self::Transaction,
    ) -> PreDecodingOutput<Self>;

    fn builtin_rules() -> Vec<BuiltinRule<Self>> {
        Vec::new()
    }

    /// Event emitted when nothing else was decoded for a transaction.
    fn fallback_event(
        _tools: &mut DecoderTools<'_, Self>,
        _tx: &Self::Transaction,
    ) -> Option<HistoryEvent<Self>> {
        None
    }
}

/// The smallest independently decodable piece of a transaction.
pub trait RawUnit<C: Chain>: fmt::Debug + Send + Sync {
    /// Key the routing table is looked up with.
    fn routing_address(&self) -> C::Address;

    /// Position of the unit inside its transaction, unique per transaction.
    fn unit_index(&self) -> u64;
}

pub trait ChainTransaction<C: Chain>: fmt::Debug + Send + Sync {
    fn tx_ref(&self) -> C::TxRef;

    fn timestamp(&self) -> TimestampMs;

    /// Units in ascending index order.
    fn units(&self) -> &[C::Unit];

    /// Lower bound for free-standing decoding indices. Must exceed every
    /// unit index of the transaction.
    fn sequence_offset(&self) -> u64;

    /// Contract or program the transaction was sent to, if any.
    fn to_address(&self) -> Option<C::Address>;
}
