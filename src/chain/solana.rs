use rust_decimal::Decimal;
use solana_pubkey::Pubkey;

use crate::chain::{CPT_GAS, Chain, ChainTransaction, Location, PreDecodingOutput, RawUnit};
use crate::decoding::tools::{DecoderTools, Direction};
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};
use crate::types::{Asset, TimestampMs, normalized_amount};

/// `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new_from_array([0; 32]);

/// `ComputeBudget111111111111111111111111111111`
pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    3, 6, 70, 111, 229, 33, 23, 50, 255, 236, 173, 186, 114, 195, 155, 231, 188, 140, 229, 187,
    197, 247, 18, 107, 44, 67, 155, 58, 64, 0, 0, 0,
]);

const SYSTEM_TRANSFER_TAG: u32 = 2;
const SOL_DECIMALS: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solana;

/// An instruction of the flattened execution tree. Top-level and inner
/// instructions share one execution index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaInstruction {
    pub execution_index: u64,
    /// Execution index of the top-level instruction for inner ones.
    pub parent_execution_index: Option<u64>,
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

impl SolanaInstruction {
    pub fn account(&self, index: usize) -> Result<Pubkey, Error> {
        self.accounts.get(index).copied().ok_or_else(|| {
            Error::unit(format!(
                "instruction {} has {} accounts, {index} missing",
                self.execution_index,
                self.accounts.len()
            ))
        })
    }

    /// `(from, to, lamports)` when this is a system program transfer.
    pub fn as_system_transfer(&self) -> Option<(Pubkey, Pubkey, u64)> {
        if self.program_id != SYSTEM_PROGRAM_ID {
            return None;
        }
        let tag = u32::from_le_bytes(self.data.get(..4)?.try_into().ok()?);
        if tag != SYSTEM_TRANSFER_TAG {
            return None;
        }
        let lamports = u64::from_le_bytes(self.data.get(4..12)?.try_into().ok()?);
        Some((*self.accounts.first()?, *self.accounts.get(1)?, lamports))
    }
}

impl RawUnit<Solana> for SolanaInstruction {
    fn routing_address(&self) -> Pubkey {
        self.program_id
    }

    fn unit_index(&self) -> u64 {
        self.execution_index
    }
}

#[derive(Debug, Clone)]
pub struct SolanaTransaction {
    /// Base58 signature.
    pub signature: String,
    pub timestamp: TimestampMs,
    /// Fee in lamports.
    pub fee: u64,
    /// Fee payer first.
    pub signers: Vec<Pubkey>,
    pub success: bool,
    /// Sorted by execution index.
    pub instructions: Vec<SolanaInstruction>,
}

impl SolanaTransaction {
    /// Inner instructions invoked by the top-level instruction `parent`.
    pub fn children_of(&self, parent: u64) -> impl Iterator<Item = &SolanaInstruction> {
        self.instructions
            .iter()
            .filter(move |ix| ix.parent_execution_index == Some(parent))
    }
}

impl ChainTransaction<Solana> for SolanaTransaction {
    fn tx_ref(&self) -> String {
        self.signature.clone()
    }

    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }

    fn units(&self) -> &[SolanaInstruction] {
        &self.instructions
    }

    fn sequence_offset(&self) -> u64 {
        self.instructions
            .iter()
            .map(|ix| ix.execution_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// First top-level program that is not ComputeBudget or System.
    fn to_address(&self) -> Option<Pubkey> {
        self.instructions
            .iter()
            .filter(|ix| ix.parent_execution_index.is_none())
            .map(|ix| ix.program_id)
            .find(|program| ![COMPUTE_BUDGET_PROGRAM_ID, SYSTEM_PROGRAM_ID].contains(program))
    }
}

impl Chain for Solana {
    type Address = Pubkey;
    type TxRef = String;
    type Unit = SolanaInstruction;
    type Transaction = SolanaTransaction;

    const LOCATION: Location = Location::Solana;

    fn native_asset() -> Asset {
        Asset::new("SOL", "SOL", SOL_DECIMALS)
    }

    fn parse_address(value: &str) -> Result<Pubkey, Error> {
        value
            .parse()
            .map_err(|e| Error::parse(format!("invalid solana address {value:?}: {e}")))
    }

    /// Fee paid by the first signer, then every system program transfer in
    /// execution order. Decoded transfers are consumed.
    fn pre_decode(
        tools: &mut DecoderTools<'_, Solana>,
        tx: &SolanaTransaction,
    ) -> PreDecodingOutput<Solana> {
        let mut output = PreDecodingOutput::default();
        if let Some(payer) = tx.signers.first()
            && tools.base().is_tracked(payer)
        {
            match normalized_amount(u128::from(tx.fee), SOL_DECIMALS) {
                Ok(fee) => {
                    let index = tools.next_pre_decoding_index();
                    let event = tools
                        .make_event(
                            index,
                            HistoryEventType::Spend,
                            HistoryEventSubType::Fee,
                            Solana::native_asset(),
                            fee,
                        )
                        .with_location_label(*payer)
                        .with_notes(format!("Spend {fee} SOL as transaction fee"))
                        .with_counterparty(CPT_GAS);
                    output.events.push(event);
                }
                Err(e) => tracing::error!(tx = %tx.signature, error = %e, "could not normalize fee"),
            }
        }
        if !tx.success {
            return output;
        }

        for ix in &tx.instructions {
            let Some((from, to, lamports)) = ix.as_system_transfer() else {
                continue;
            };
            output.consumed_units.insert(ix.execution_index);
            let Some(direction) = tools.base().decode_direction(&from, Some(&to)) else {
                continue;
            };
            let amount = match normalized_amount(u128::from(lamports), SOL_DECIMALS) {
                Ok(amount) => amount,
                Err(e) => {
                    tracing::error!(tx = %tx.signature, error = %e, "could not normalize transfer");
                    continue;
                }
            };
            if amount.is_zero() {
                continue;
            }
            let index = tools.next_pre_decoding_index();
            output
                .events
                .push(native_transfer_event(tools, index, &direction, amount));
        }
        output
    }
}

fn native_transfer_event(
    tools: &DecoderTools<'_, Solana>,
    sequence_index: u64,
    direction: &Direction<Solana>,
    amount: Decimal,
) -> HistoryEvent<Solana> {
    let other = direction
        .counterparty
        .clone()
        .or_else(|| direction.address.map(|address| address.to_string()))
        .unwrap_or_default();
    let preposition = if direction.event_type.is_outgoing() {
        "to"
    } else {
        "from"
    };
    let mut event = tools
        .make_event(
            sequence_index,
            direction.event_type,
            direction.event_subtype,
            Solana::native_asset(),
            amount,
        )
        .with_location_label(direction.location_label)
        .with_address(direction.address)
        .with_notes(format!("{} {amount} SOL {preposition} {other}", direction.verb));
    event.counterparty.clone_from(&direction.counterparty);
    event
}
