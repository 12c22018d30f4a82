use alloy_primitives::{Address, B256, Bytes, U256, b256};
use rust_decimal::Decimal;

use crate::chain::{
    BuiltinRule, CPT_GAS, Chain, ChainTransaction, Location, PreDecodingOutput, RawUnit,
};
use crate::decoding::interface::DecoderContext;
use crate::decoding::output::DecodingOutput;
use crate::decoding::tools::{DecoderTools, Direction};
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};
use crate::types::{Asset, TimestampMs, normalized_u256};

pub const ERC20_OR_ERC721_TRANSFER: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
pub const ERC20_OR_ERC721_APPROVE: B256 =
    b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");

const ETH_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evm;

/// One receipt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub log_index: u64,
}

impl EvmLog {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    /// The `index`-th 32-byte word of the log data.
    pub fn data_word(&self, index: usize) -> Result<U256, Error> {
        let start = index * 32;
        self.data
            .get(start..start + 32)
            .map(U256::from_be_slice)
            .ok_or_else(|| {
                Error::unit(format!(
                    "log {} has {} data bytes, word {index} missing",
                    self.log_index,
                    self.data.len()
                ))
            })
    }

    /// The address packed into topic `index`.
    pub fn topic_address(&self, index: usize) -> Result<Address, Error> {
        self.topics
            .get(index)
            .map(|topic| Address::from_word(*topic))
            .ok_or_else(|| Error::unit(format!("log {} has no topic {index}", self.log_index)))
    }
}

impl RawUnit<Evm> for EvmLog {
    fn routing_address(&self) -> Address {
        self.address
    }

    fn unit_index(&self) -> u64 {
        self.log_index
    }
}

/// A transaction together with its receipt.
#[derive(Debug, Clone)]
pub struct EvmTransaction {
    pub tx_hash: B256,
    pub timestamp: TimestampMs,
    pub from_address: Address,
    /// `None` for contract creation.
    pub to_address: Option<Address>,
    pub value: U256,
    pub gas_used: u64,
    pub gas_price: u128,
    pub success: bool,
    /// Sorted by log index.
    pub logs: Vec<EvmLog>,
}

impl EvmTransaction {
    fn gas_burned(&self) -> Result<Decimal, Error> {
        let wei = U256::from(self.gas_used) * U256::from(self.gas_price);
        normalized_u256(wei, ETH_DECIMALS)
    }
}

impl ChainTransaction<Evm> for EvmTransaction {
    fn tx_ref(&self) -> B256 {
        self.tx_hash
    }

    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }

    fn units(&self) -> &[EvmLog] {
        &self.logs
    }

    fn sequence_offset(&self) -> u64 {
        self.logs.last().map_or(0, |log| log.log_index + 1)
    }

    fn to_address(&self) -> Option<Address> {
        self.to_address
    }
}

impl Chain for Evm {
    type Address = Address;
    type TxRef = B256;
    type Unit = EvmLog;
    type Transaction = EvmTransaction;

    const LOCATION: Location = Location::Ethereum;

    fn native_asset() -> Asset {
        Asset::new("ETH", "ETH", ETH_DECIMALS)
    }

    fn parse_address(value: &str) -> Result<Address, Error> {
        value
            .parse()
            .map_err(|e| Error::parse(format!("invalid evm address {value:?}: {e}")))
    }

    /// Gas fee first so it always takes index 0, then the native value
    /// transfer or contract deployment.
    fn pre_decode(tools: &mut DecoderTools<'_, Evm>, tx: &EvmTransaction) -> PreDecodingOutput<Evm> {
        let mut output = PreDecodingOutput::default();
        let direction = tools
            .base()
            .decode_direction(&tx.from_address, tx.to_address.as_ref());

        if let Some(direction) = &direction
            && direction.event_type.is_outgoing()
        {
            match tx.gas_burned() {
                Ok(gas) => {
                    let native = Evm::native_asset();
                    let mut notes = format!("Burn {gas} {} for gas", native.symbol);
                    let mut event_type = HistoryEventType::Spend;
                    if !tx.success {
                        notes.push_str(" of a failed transaction");
                        event_type = HistoryEventType::Fail;
                    }
                    let index = tools.next_pre_decoding_index();
                    let event = tools
                        .make_event(index, event_type, HistoryEventSubType::Fee, native, gas)
                        .with_location_label(direction.location_label)
                        .with_notes(notes)
                        .with_counterparty(CPT_GAS);
                    output.events.push(event);
                }
                Err(e) => tracing::error!(tx = %tx.tx_hash, error = %e, "could not compute gas fee"),
            }
        }

        let Some(direction) = direction else {
            return output;
        };
        if !tx.success {
            return output;
        }
        let amount = match normalized_u256(tx.value, ETH_DECIMALS) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::error!(tx = %tx.tx_hash, error = %e, "could not normalize transaction value");
                return output;
            }
        };

        if tx.to_address.is_none() {
            if !tools.base().is_tracked(&tx.from_address) {
                return output;
            }
            let subtype = if amount.is_zero() {
                HistoryEventSubType::None
            } else {
                HistoryEventSubType::Spend
            };
            let index = tools.next_pre_decoding_index();
            let event = tools
                .make_event(index, HistoryEventType::Deploy, subtype, Evm::native_asset(), amount)
                .with_location_label(tx.from_address)
                .with_notes("Contract deployment");
            output.events.push(event);
            return output;
        }

        if !amount.is_zero() {
            let index = tools.next_pre_decoding_index();
            output
                .events
                .push(native_transfer_event(tools, index, &direction, amount));
        }
        output
    }

    fn builtin_rules() -> Vec<BuiltinRule<Evm>> {
        vec![decode_erc20_approve, decode_erc20_transfer]
    }

    /// Zero-value interaction between tracked parties that nothing else
    /// explained still shows up as a native transfer.
    fn fallback_event(
        tools: &mut DecoderTools<'_, Evm>,
        tx: &EvmTransaction,
    ) -> Option<HistoryEvent<Evm>> {
        if !tx.success {
            return None;
        }
        let direction = tools
            .base()
            .decode_direction(&tx.from_address, tx.to_address.as_ref())?;
        let amount = normalized_u256(tx.value, ETH_DECIMALS).ok()?;
        let index = tools.next_decoding_index();
        Some(native_transfer_event(tools, index, &direction, amount))
    }
}

fn native_transfer_event(
    tools: &DecoderTools<'_, Evm>,
    sequence_index: u64,
    direction: &Direction<Evm>,
    amount: Decimal,
) -> HistoryEvent<Evm> {
    let native = Evm::native_asset();
    let preposition = if direction.event_type.is_outgoing() {
        "to"
    } else {
        "from"
    };
    let other = other_side(direction);
    let notes = format!(
        "{} {amount} {} {preposition} {other}",
        direction.verb, native.symbol
    );
    let event = tools
        .make_event(
            sequence_index,
            direction.event_type,
            direction.event_subtype,
            native,
            amount,
        )
        .with_location_label(direction.location_label)
        .with_address(direction.address)
        .with_notes(notes);
    match &direction.counterparty {
        Some(counterparty) => event.with_counterparty(counterparty.clone()),
        None => event,
    }
}

fn other_side(direction: &Direction<Evm>) -> String {
    match (&direction.counterparty, direction.address) {
        (Some(counterparty), _) => counterparty.clone(),
        (None, Some(address)) => address.to_string(),
        (None, None) => "unknown".to_owned(),
    }
}

/// ERC20 `Transfer(from, to, value)` touching a tracked account.
pub fn decode_erc20_transfer(
    ctx: &mut DecoderContext<'_, '_, Evm>,
) -> Result<DecodingOutput<Evm>, Error> {
    let log = ctx.unit;
    if log.topic0() != Some(&ERC20_OR_ERC721_TRANSFER) || log.topics.len() != 3 {
        return Ok(DecodingOutput::default());
    }
    let from = log.topic_address(1)?;
    let to = log.topic_address(2)?;
    let Some(direction) = ctx.tools.base().decode_direction(&from, Some(&to)) else {
        return Ok(DecodingOutput::default());
    };

    let token = ctx.tools.base().resolve_token(&log.address)?;
    let amount = normalized_u256(log.data_word(0)?, token.decimals)?;
    if amount.is_zero() {
        return Ok(DecodingOutput::default());
    }

    let other = other_side(&direction);
    let notes = if direction.event_type.is_outgoing() {
        format!(
            "{} {amount} {} from {} to {other}",
            direction.verb, token.symbol, direction.location_label
        )
    } else {
        format!(
            "{} {amount} {} from {other} to {}",
            direction.verb, token.symbol, direction.location_label
        )
    };
    let mut event = ctx
        .tools
        .make_event_for_unit(log, direction.event_type, direction.event_subtype, token, amount)
        .with_location_label(direction.location_label)
        .with_address(direction.address)
        .with_notes(notes);
    event.counterparty = direction.counterparty;
    Ok(DecodingOutput::with_event(event))
}

/// ERC20 `Approval(owner, spender, value)` where either side is tracked.
pub fn decode_erc20_approve(
    ctx: &mut DecoderContext<'_, '_, Evm>,
) -> Result<DecodingOutput<Evm>, Error> {
    let log = ctx.unit;
    if log.topic0() != Some(&ERC20_OR_ERC721_APPROVE) || log.topics.len() != 3 {
        return Ok(DecodingOutput::default());
    }
    let owner = log.topic_address(1)?;
    let spender = log.topic_address(2)?;
    if !ctx.tools.base().any_tracked(&[owner, spender]) {
        return Ok(DecodingOutput::default());
    }

    let token = ctx.tools.base().resolve_token(&log.address)?;
    let raw = log.data_word(0)?;
    let (amount, notes) = if raw.is_zero() {
        (
            Decimal::ZERO,
            format!("Revoke {} spending approval of {owner} by {spender}", token.symbol),
        )
    } else if raw == U256::MAX {
        (
            Decimal::MAX,
            format!(
                "Set {} spending approval of {owner} by {spender} to unlimited",
                token.symbol
            ),
        )
    } else {
        let amount = normalized_u256(raw, token.decimals)?;
        (
            amount,
            format!(
                "Set {} spending approval of {owner} by {spender} to {amount}",
                token.symbol
            ),
        )
    };
    let event = ctx
        .tools
        .make_event_for_unit(
            log,
            HistoryEventType::Informational,
            HistoryEventSubType::Approve,
            token,
            amount,
        )
        .with_location_label(owner)
        .with_address(spender)
        .with_notes(notes);
    Ok(DecodingOutput::with_event(event))
}
