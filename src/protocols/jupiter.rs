//! Jupiter v6 swap aggregator on Solana.
//!
//! Every hop of a route is logged through a self-CPI carrying an anchor
//! `SwapEvent`. The top-level route instruction is decoded by reading the
//! events of its inner instructions.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use solana_pubkey::Pubkey;

use crate::chain::solana::{Solana, SolanaInstruction};
use crate::decoding::interface::{CounterpartyDetails, DecodeRoute, Decoder, DecoderContext, PostDecodingRule};
use crate::decoding::output::DecodingOutput;
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};
use crate::protocols::{CPT_JUPITER, is_trade_leg_of, trade_leg_notes};
use crate::types::{Asset, normalized_amount};

/// `JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4`
pub const JUPITER_V6_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    4, 121, 213, 91, 242, 49, 192, 110, 238, 116, 197, 110, 206, 104, 21, 7, 253, 177, 178, 222,
    163, 244, 142, 81, 2, 177, 205, 162, 86, 188, 19, 143,
]);

/// Anchor's `EVENT_IX_TAG` in little endian.
const EVENT_CPI_TAG: [u8; 8] = [0xe4, 0x45, 0xa5, 0x2e, 0x51, 0xcb, 0x9a, 0x1d];
const SWAP_EVENT_DISCRIMINATOR: [u8; 8] = [0x40, 0xc6, 0xcd, 0xe8, 0x26, 0x08, 0x71, 0xe2];
const SWAP_EVENT_LEN: usize = 16 + 32 + 32 + 8 + 32 + 8;

const VENUE: &str = "in Jupiter";

/// One hop of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {
    pub amm: Pubkey,
    pub input_mint: Pubkey,
    pub input_amount: u64,
    pub output_mint: Pubkey,
    pub output_amount: u64,
}

fn read_pubkey(data: &[u8], offset: usize) -> Option<Pubkey> {
    let bytes: [u8; 32] = data.get(offset..offset + 32)?.try_into().ok()?;
    Some(Pubkey::new_from_array(bytes))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(data.get(offset..offset + 8)?.try_into().ok()?))
}

impl SwapEvent {
    /// Parses the data of a self-CPI instruction. `None` for anything that
    /// is not a `SwapEvent`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SWAP_EVENT_LEN
            || data[..8] != EVENT_CPI_TAG
            || data[8..16] != SWAP_EVENT_DISCRIMINATOR
        {
            return None;
        }
        Some(Self {
            amm: read_pubkey(data, 16)?,
            input_mint: read_pubkey(data, 48)?,
            input_amount: read_u64(data, 80)?,
            output_mint: read_pubkey(data, 88)?,
            output_amount: read_u64(data, 120)?,
        })
    }

    pub fn from_instruction(ix: &SolanaInstruction) -> Option<Self> {
        if ix.program_id != JUPITER_V6_PROGRAM_ID {
            return None;
        }
        Self::parse(&ix.data)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JupiterDecoder;

impl Decoder<Solana> for JupiterDecoder {
    fn name(&self) -> &'static str {
        "Jupiter"
    }

    fn counterparties(&self) -> Vec<CounterpartyDetails> {
        vec![CounterpartyDetails::new(CPT_JUPITER, "Jupiter")]
    }

    fn addresses_to_decoders(&self) -> HashMap<Pubkey, DecodeRoute<Solana>> {
        HashMap::from([(
            JUPITER_V6_PROGRAM_ID,
            DecodeRoute::new(|ctx, _| decode_route(ctx)),
        )])
    }

    fn post_decoding_rules(&self) -> HashMap<String, Vec<PostDecodingRule<Solana>>> {
        HashMap::from([(
            CPT_JUPITER.to_owned(),
            vec![PostDecodingRule::new(0, |_, events| Ok(fuse_split_legs(events)))],
        )])
    }
}

/// `(mint, raw amount, amm)` legs the user actually pays or receives.
/// Mints produced by one hop and consumed by the next are internal to the
/// route. A circular route falls back to first input and last output.
fn net_legs(hops: &[SwapEvent]) -> (Vec<(Pubkey, u64, Pubkey)>, Vec<(Pubkey, u64, Pubkey)>) {
    let inputs: HashSet<Pubkey> = hops.iter().map(|hop| hop.input_mint).collect();
    let outputs: HashSet<Pubkey> = hops.iter().map(|hop| hop.output_mint).collect();
    let mut spends: Vec<_> = hops
        .iter()
        .filter(|hop| !outputs.contains(&hop.input_mint))
        .map(|hop| (hop.input_mint, hop.input_amount, hop.amm))
        .collect();
    let mut receives: Vec<_> = hops
        .iter()
        .filter(|hop| !inputs.contains(&hop.output_mint))
        .map(|hop| (hop.output_mint, hop.output_amount, hop.amm))
        .collect();
    if (spends.is_empty() || receives.is_empty())
        && let (Some(first), Some(last)) = (hops.first(), hops.last())
    {
        spends = vec![(first.input_mint, first.input_amount, first.amm)];
        receives = vec![(last.output_mint, last.output_amount, last.amm)];
    }
    (spends, receives)
}

fn decode_route(ctx: &mut DecoderContext<'_, '_, Solana>) -> Result<DecodingOutput<Solana>, Error> {
    let ix = ctx.unit;
    if ix.parent_execution_index.is_some() {
        return Ok(DecodingOutput::default());
    }
    let tx = ctx.transaction;
    let hops: Vec<SwapEvent> = tx
        .children_of(ix.execution_index)
        .filter_map(SwapEvent::from_instruction)
        .collect();
    if hops.is_empty() {
        return Ok(DecodingOutput::default());
    }
    let base = ctx.tools.base();
    let Some(user) = tx.signers.iter().copied().find(|signer| base.is_tracked(signer)) else {
        return Ok(DecodingOutput::default());
    };

    let (spends, receives) = net_legs(&hops);
    let mut legs: Vec<(HistoryEventSubType, Asset, Decimal, Pubkey)> = Vec::new();
    for (subtype, side) in [
        (HistoryEventSubType::Spend, spends),
        (HistoryEventSubType::Receive, receives),
    ] {
        for (mint, raw, amm) in side {
            let asset = match base.resolve_token(&mint) {
                Ok(asset) => asset,
                Err(e) => {
                    base.msg_aggregator().notify_user(
                        &format!(
                            "Could not identify token {mint} swapped through Jupiter in transaction {}: {e}",
                            tx.signature
                        ),
                        CPT_JUPITER,
                    );
                    return Ok(DecodingOutput::default());
                }
            };
            let amount = normalized_amount(u128::from(raw), asset.decimals)?;
            legs.push((subtype, asset, amount, amm));
        }
    }

    let mut events = Vec::with_capacity(legs.len());
    for (position, (subtype, asset, amount, amm)) in legs.into_iter().enumerate() {
        let notes = trade_leg_notes(subtype, amount, &asset, VENUE);
        let index = if position == 0 {
            ctx.tools.sequence_index_for_unit(ix)
        } else {
            ctx.tools.next_decoding_index()
        };
        let event = ctx
            .tools
            .make_event(index, HistoryEventType::Trade, subtype, asset, amount)
            .with_location_label(user)
            .with_address(amm)
            .with_notes(notes)
            .with_counterparty(CPT_JUPITER);
        events.push(event);
    }
    let last = events.pop();
    ctx.decoded_events.extend(events);
    Ok(DecodingOutput {
        event: last,
        ..DecodingOutput::default()
    }
    .swaps())
}

/// Split routes pay or receive the same mint over several hops. Legs of one
/// kind and asset merge into the earliest one.
pub fn fuse_split_legs(events: Vec<HistoryEvent<Solana>>) -> Vec<HistoryEvent<Solana>> {
    let mut fused: Vec<HistoryEvent<Solana>> = Vec::with_capacity(events.len());
    let mut positions: HashMap<(HistoryEventSubType, String), usize> = HashMap::new();
    let mut merged_any = false;
    for event in events {
        if !is_trade_leg_of(&event, CPT_JUPITER) {
            fused.push(event);
            continue;
        }
        let key = (event.event_subtype, event.asset.identifier.clone());
        match positions.get(&key) {
            Some(&position) => {
                let target = &mut fused[position];
                target.amount = (target.amount + event.amount).normalize();
                target.sequence_index = target.sequence_index.min(event.sequence_index);
                merged_any = true;
            }
            None => {
                positions.insert(key, fused.len());
                fused.push(event);
            }
        }
    }
    if merged_any {
        for event in &mut fused {
            if is_trade_leg_of(event, CPT_JUPITER) {
                event.notes = Some(trade_leg_notes(
                    event.event_subtype,
                    event.amount,
                    &event.asset,
                    VENUE,
                ));
            }
        }
    }
    fused
}
