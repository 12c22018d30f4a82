//! Uniswap-V2-style constant product pools.
//!
//! Swaps are decoded from the pool's `Swap` log. The token transfers that
//! precede it in the receipt were already turned into plain spend/receive
//! events by the ERC20 rule; those are retagged as trade legs. Legs with no
//! matching transfer (e.g. intermediate hops paid out to another pool) are
//! created from the swap amounts.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use alloy_primitives::{Address, B256, U256, b256};
use rust_decimal::Decimal;

use crate::chain::evm::{Evm, EvmLog};
use crate::collaborators::NodeInquirer;
use crate::config::ResolvedAmm;
use crate::decoding::interface::{CounterpartyDetails, DecodeRoute, Decoder, DecoderContext};
use crate::decoding::output::DecodingOutput;
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};
use crate::protocols::{CPT_AMM, trade_leg_notes};
use crate::types::{Asset, normalized_u256};

pub const AMM_DECODER_NAME: &str = "Amm";

/// `Swap(address,uint256,uint256,uint256,uint256,address)`
pub const SWAP: B256 = b256!("d78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822");
/// `PairCreated(address,address,address,uint256)`
pub const PAIR_CREATED: B256 =
    b256!("0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9");

const ALL_PAIRS_LENGTH: [u8; 4] = [0x57, 0x4f, 0x2b, 0xa3];
const ALL_PAIRS: [u8; 4] = [0x1e, 0x3d, 0xd1, 0x8b];
const TOKEN0: [u8; 4] = [0x0d, 0xfe, 0x16, 0x81];
const TOKEN1: [u8; 4] = [0xd2, 0x12, 0x20, 0xa7];

const MAX_PAIRS_PER_RELOAD: u64 = 500;
const VENUE: &str = "in AMM";

#[derive(Debug, Clone, Default)]
struct PoolCache {
    /// Pool to `(token0, token1)`.
    pools: HashMap<Address, (Address, Address)>,
    /// How many factory pairs have been queried so far.
    factory_pairs: u64,
}

type SharedPoolCache = Arc<RwLock<Arc<PoolCache>>>;

fn snapshot(cache: &SharedPoolCache) -> Arc<PoolCache> {
    Arc::clone(&cache.read().unwrap_or_else(PoisonError::into_inner))
}

pub struct AmmDecoder {
    factory: Option<Address>,
    cache: SharedPoolCache,
    node_inquirer: Arc<dyn NodeInquirer<Evm>>,
}

impl AmmDecoder {
    pub fn new(settings: &ResolvedAmm<Evm>, node_inquirer: Arc<dyn NodeInquirer<Evm>>) -> Self {
        let cache = PoolCache {
            pools: settings.pools.clone(),
            factory_pairs: 0,
        };
        Self {
            factory: settings.factory,
            cache: Arc::new(RwLock::new(Arc::new(cache))),
            node_inquirer,
        }
    }

    pub fn pool_tokens(&self, pool: &Address) -> Option<(Address, Address)> {
        snapshot(&self.cache).pools.get(pool).copied()
    }

    fn swap_route(&self) -> DecodeRoute<Evm> {
        let cache = Arc::clone(&self.cache);
        DecodeRoute::new(move |ctx, _| decode_swap(ctx, &snapshot(&cache)))
    }

    fn call_word(&self, target: &Address, calldata: &[u8]) -> Result<B256, Error> {
        let data = self.node_inquirer.call(target, calldata)?;
        data.get(..32).map(B256::from_slice).ok_or_else(|| {
            Error::remote(format!(
                "call to {target} returned {} bytes, expected a word",
                data.len()
            ))
        })
    }

    /// Pairs the factory created since the last query, with their tokens.
    fn discover_pairs(
        &self,
        factory: &Address,
        already_seen: u64,
    ) -> Result<(u64, Vec<(Address, (Address, Address))>), Error> {
        let length = U256::from_be_bytes(self.call_word(factory, &ALL_PAIRS_LENGTH)?.0);
        let length = u64::try_from(length)
            .map_err(|_| Error::remote(format!("factory {factory} reported {length} pairs")))?;
        let until = length.min(already_seen + MAX_PAIRS_PER_RELOAD);

        let mut discovered = Vec::new();
        for index in already_seen..until {
            let mut calldata = ALL_PAIRS.to_vec();
            calldata.extend_from_slice(&U256::from(index).to_be_bytes::<32>());
            let pair = Address::from_word(self.call_word(factory, &calldata)?);
            let token0 = Address::from_word(self.call_word(&pair, &TOKEN0)?);
            let token1 = Address::from_word(self.call_word(&pair, &TOKEN1)?);
            discovered.push((pair, (token0, token1)));
        }
        if until < length {
            tracing::debug!(
                factory = %factory,
                remaining = length - until,
                "pair discovery capped, continuing on next reload"
            );
        }
        Ok((until, discovered))
    }
}

impl Decoder<Evm> for AmmDecoder {
    fn name(&self) -> &'static str {
        AMM_DECODER_NAME
    }

    fn counterparties(&self) -> Vec<CounterpartyDetails> {
        vec![CounterpartyDetails::new(CPT_AMM, "AMM")]
    }

    fn addresses_to_decoders(&self) -> HashMap<Address, DecodeRoute<Evm>> {
        let route = self.swap_route();
        let mut routes: HashMap<Address, DecodeRoute<Evm>> = snapshot(&self.cache)
            .pools
            .keys()
            .map(|pool| (*pool, route.clone()))
            .collect();
        if let Some(factory) = self.factory {
            routes.insert(factory, DecodeRoute::new(|ctx, _| decode_factory(ctx)));
        }
        routes
    }

    fn reload_data(&self) -> Result<Option<HashMap<Address, DecodeRoute<Evm>>>, Error> {
        let Some(factory) = self.factory else {
            return Ok(None);
        };
        let seen = snapshot(&self.cache).factory_pairs;
        let (queried, discovered) = self.discover_pairs(&factory, seen)?;
        if queried == seen {
            return Ok(None);
        }

        let route = self.swap_route();
        let mut routes = HashMap::with_capacity(discovered.len());
        {
            let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = PoolCache::clone(&guard);
            next.factory_pairs = next.factory_pairs.max(queried);
            for (pair, tokens) in discovered {
                next.pools.insert(pair, tokens);
                routes.insert(pair, route.clone());
            }
            *guard = Arc::new(next);
        }
        tracing::debug!(factory = %factory, pools = routes.len(), "amm pool cache refreshed");
        Ok(Some(routes))
    }
}

fn decode_factory(ctx: &mut DecoderContext<'_, '_, Evm>) -> Result<DecodingOutput<Evm>, Error> {
    if ctx.unit.topic0() == Some(&PAIR_CREATED) {
        return Ok(DecodingOutput::reload([AMM_DECODER_NAME]));
    }
    Ok(DecodingOutput::default())
}

/// Non-zero side of a pool's in or out amounts.
fn pick_side(
    log: &EvmLog,
    tokens: (Address, Address),
    first_word: usize,
) -> Result<(Address, U256), Error> {
    let amount0 = log.data_word(first_word)?;
    let amount1 = log.data_word(first_word + 1)?;
    if amount0.is_zero() {
        Ok((tokens.1, amount1))
    } else {
        Ok((tokens.0, amount0))
    }
}

/// Turns an already decoded plain transfer of `asset` into a trade leg.
fn retag_transfer(
    events: &mut [HistoryEvent<Evm>],
    from_type: HistoryEventType,
    to_subtype: HistoryEventSubType,
    user: Address,
    pool: Address,
    asset: &Asset,
    amount: Decimal,
) -> bool {
    let Some(event) = events.iter_mut().find(|event| {
        event.event_type == from_type
            && event.location_label == Some(user)
            && event.asset.identifier == asset.identifier
            && event.amount == amount
    }) else {
        return false;
    };
    event.event_type = HistoryEventType::Trade;
    event.event_subtype = to_subtype;
    event.counterparty = Some(CPT_AMM.to_owned());
    event.address = Some(pool);
    event.notes = Some(trade_leg_notes(to_subtype, amount, asset, VENUE));
    true
}

fn decode_swap(
    ctx: &mut DecoderContext<'_, '_, Evm>,
    cache: &PoolCache,
) -> Result<DecodingOutput<Evm>, Error> {
    let log = ctx.unit;
    if log.topic0() != Some(&SWAP) {
        return Ok(DecodingOutput::default());
    }
    let Some(&tokens) = cache.pools.get(&log.address) else {
        return Err(Error::unit(format!("swap log on unknown pool {}", log.address)));
    };
    let (token_in, raw_in) = pick_side(log, tokens, 0)?;
    let (token_out, raw_out) = pick_side(log, tokens, 2)?;
    let recipient = log.topic_address(2)?;

    let tx = ctx.transaction;
    let base = ctx.tools.base();
    let user = if base.is_tracked(&tx.from_address) {
        tx.from_address
    } else if base.is_tracked(&recipient) {
        recipient
    } else {
        return Ok(DecodingOutput::default());
    };

    let (asset_in, asset_out) = match (base.resolve_token(&token_in), base.resolve_token(&token_out)) {
        (Ok(asset_in), Ok(asset_out)) => (asset_in, asset_out),
        (Err(e), _) | (_, Err(e)) => {
            base.msg_aggregator().notify_user(
                &format!(
                    "Could not identify a token swapped in pool {} of transaction {}: {e}",
                    log.address, tx.tx_hash
                ),
                CPT_AMM,
            );
            return Ok(DecodingOutput::default());
        }
    };
    let amount_in = normalized_u256(raw_in, asset_in.decimals)?;
    let amount_out = normalized_u256(raw_out, asset_out.decimals)?;

    if !retag_transfer(
        ctx.decoded_events,
        HistoryEventType::Spend,
        HistoryEventSubType::Spend,
        user,
        log.address,
        &asset_in,
        amount_in,
    ) {
        let notes = trade_leg_notes(HistoryEventSubType::Spend, amount_in, &asset_in, VENUE);
        let spend = ctx
            .tools
            .make_event_for_unit(
                log,
                HistoryEventType::Trade,
                HistoryEventSubType::Spend,
                asset_in,
                amount_in,
            )
            .with_location_label(user)
            .with_address(log.address)
            .with_notes(notes)
            .with_counterparty(CPT_AMM);
        ctx.decoded_events.push(spend);
    }

    let mut output = DecodingOutput::default().swaps();
    if !retag_transfer(
        ctx.decoded_events,
        HistoryEventType::Receive,
        HistoryEventSubType::Receive,
        user,
        log.address,
        &asset_out,
        amount_out,
    ) {
        let notes = trade_leg_notes(HistoryEventSubType::Receive, amount_out, &asset_out, VENUE);
        let receive = ctx
            .tools
            .make_event_next_index(
                HistoryEventType::Trade,
                HistoryEventSubType::Receive,
                asset_out,
                amount_out,
            )
            .with_location_label(user)
            .with_address(log.address)
            .with_notes(notes)
            .with_counterparty(CPT_AMM);
        output.event = Some(receive);
    }
    Ok(output)
}
