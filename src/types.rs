use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, U256};
use rust_decimal::Decimal;
use solana_pubkey::Pubkey;

use crate::chain::evm::{EvmLog, EvmTransaction};
use crate::chain::solana::{SolanaInstruction, SolanaTransaction};
use crate::error::Error;

/// Milliseconds since the unix epoch.
pub type TimestampMs = i64;

/// An asset as the decoder sees it: an identifier plus what is needed to
/// normalize raw on-chain amounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Asset {
    /// Stable identifier, e.g. `"ETH"` or `"eip155:1/erc20:0x..."`.
    pub identifier: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Asset {
    pub fn new(identifier: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            identifier: identifier.into(),
            symbol: symbol.into(),
            decimals,
        }
    }
}

/// Digits a `Decimal` mantissa can always hold.
const DECIMAL_DIGITS: u8 = 28;

/// Scales a raw integer amount down by `decimals`.
pub fn normalized_amount(raw: u128, decimals: u8) -> Result<Decimal, Error> {
    normalized_u256(U256::from(raw), decimals)
}

/// Same as [`normalized_amount`] for 256-bit EVM words. Fraction digits
/// that do not fit next to the integer part are truncated; an integer part
/// above `Decimal::MAX` is an error.
pub fn normalized_u256(raw: U256, decimals: u8) -> Result<Decimal, Error> {
    let ten = U256::from(10u8);
    let unit = ten.pow(U256::from(decimals));
    let (integer, fraction) = raw.div_rem(unit);

    let integer_digits = if integer.is_zero() {
        0
    } else {
        integer.to_string().len() as u8
    };
    let kept = decimals.min(DECIMAL_DIGITS.saturating_sub(integer_digits));
    let dropped = ten.pow(U256::from(decimals - kept));
    let mantissa = integer * ten.pow(U256::from(kept)) + fraction / dropped;

    let mantissa = i128::try_from(mantissa)
        .map_err(|_| Error::unit(format!("amount {raw} with {decimals} decimals overflows")))?;
    Decimal::try_from_i128_with_scale(mantissa, u32::from(kept))
        .map(|amount| amount.normalize())
        .map_err(|e| Error::unit(format!("amount {raw} with {decimals} decimals: {e}")))
}

pub(crate) fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}

pub(crate) fn serialize_opt_display<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: serde::Serializer,
{
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}

/// An EVM log row as exported by the upstream indexer.
#[derive(Debug, serde::Deserialize)]
pub struct RawEvmLog {
    pub address: String,
    pub topics: Vec<String>,
    /// Hex-encoded log data, `0x` prefixed.
    #[serde(default)]
    pub data: String,
    pub log_index: u64,
}

/// An EVM transaction row with its receipt logs.
#[derive(Debug, serde::Deserialize)]
pub struct RawEvmTransaction {
    pub tx_hash: String,
    pub timestamp: TimestampMs,
    pub from_address: String,
    /// `None` for contract creation.
    pub to_address: Option<String>,
    /// Native value in wei, decimal string.
    #[serde(default)]
    pub value: String,
    pub gas_used: u64,
    /// Effective gas price in wei, decimal string.
    pub gas_price: String,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub logs: Vec<RawEvmLog>,
}

/// A flattened Solana instruction row. Inner instructions carry the
/// execution index of the instruction that invoked them.
#[derive(Debug, serde::Deserialize)]
pub struct RawSolanaInstruction {
    pub execution_index: u64,
    pub parent_execution_index: Option<u64>,
    pub program_id: String,
    pub accounts: Vec<String>,
    /// Hex-encoded instruction data.
    #[serde(default)]
    pub data: String,
}

/// A Solana transaction row as exported by the upstream indexer.
#[derive(Debug, serde::Deserialize)]
pub struct RawSolanaTransaction {
    /// Base58 signature.
    pub signature: String,
    pub timestamp: TimestampMs,
    /// Fee in lamports.
    pub fee: u64,
    /// Signer accounts, fee payer first.
    pub signers: Vec<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    pub instructions: Vec<RawSolanaInstruction>,
}

fn default_success() -> bool {
    true
}

fn parse<T: FromStr>(value: &str, what: &str) -> Result<T, Error>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::parse(format!("invalid {what} {value:?}: {e}")))
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>, Error> {
    if value.is_empty() || value == "0x" {
        return Ok(Vec::new());
    }
    let bytes: Bytes = parse(value, "hex data")?;
    Ok(bytes.to_vec())
}

impl TryFrom<RawEvmLog> for EvmLog {
    type Error = Error;

    fn try_from(raw: RawEvmLog) -> Result<Self, Self::Error> {
        let topics = raw
            .topics
            .iter()
            .map(|topic| parse::<B256>(topic, "log topic"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            address: parse::<Address>(&raw.address, "log address")?,
            topics,
            data: decode_hex(&raw.data)?.into(),
            log_index: raw.log_index,
        })
    }
}

impl TryFrom<RawEvmTransaction> for EvmTransaction {
    type Error = Error;

    fn try_from(raw: RawEvmTransaction) -> Result<Self, Self::Error> {
        let value = if raw.value.is_empty() {
            U256::ZERO
        } else {
            parse::<U256>(&raw.value, "value")?
        };
        let to_address = raw
            .to_address
            .as_deref()
            .map(|to| parse::<Address>(to, "to address"))
            .transpose()?;
        let mut logs = raw
            .logs
            .into_iter()
            .map(EvmLog::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        logs.sort_by_key(|log| log.log_index);
        Ok(Self {
            tx_hash: parse::<B256>(&raw.tx_hash, "tx hash")?,
            timestamp: raw.timestamp,
            from_address: parse::<Address>(&raw.from_address, "from address")?,
            to_address,
            value,
            gas_used: raw.gas_used,
            gas_price: parse::<u128>(&raw.gas_price, "gas price")?,
            success: raw.success,
            logs,
        })
    }
}

impl TryFrom<RawSolanaInstruction> for SolanaInstruction {
    type Error = Error;

    fn try_from(raw: RawSolanaInstruction) -> Result<Self, Self::Error> {
        let accounts = raw
            .accounts
            .iter()
            .map(|account| parse::<Pubkey>(account, "account"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            execution_index: raw.execution_index,
            parent_execution_index: raw.parent_execution_index,
            program_id: parse::<Pubkey>(&raw.program_id, "program id")?,
            accounts,
            data: decode_hex(&raw.data)?,
        })
    }
}

impl TryFrom<RawSolanaTransaction> for SolanaTransaction {
    type Error = Error;

    fn try_from(raw: RawSolanaTransaction) -> Result<Self, Self::Error> {
        let signers = raw
            .signers
            .iter()
            .map(|signer| parse::<Pubkey>(signer, "signer"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut instructions = raw
            .instructions
            .into_iter()
            .map(SolanaInstruction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        instructions.sort_by_key(|ix| ix.execution_index);
        Ok(Self {
            signature: raw.signature,
            timestamp: raw.timestamp,
            fee: raw.fee,
            signers,
            success: raw.success,
            instructions,
        })
    }
}
