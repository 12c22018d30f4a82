//! Protocol decoders shipped with the crate and helpers to assemble a
//! ready-to-use transaction decoder per chain from [`DecoderSettings`].
//!
//! [`DecoderSettings`]: crate::config::DecoderSettings

pub mod aggregator;
pub mod amm;
pub mod jupiter;

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::chain::Chain;
use crate::chain::evm::Evm;
use crate::chain::solana::Solana;
use crate::collaborators::{MessageAggregator, NodeInquirer, StaticAssetResolver, UnavailableNodeInquirer};
use crate::config::ResolvedSettings;
use crate::decoding::decoder::TransactionDecoder;
use crate::decoding::tools::BaseDecoderTools;
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};
use crate::types::Asset;

pub use aggregator::AggregatorDecoder;
pub use amm::AmmDecoder;
pub use jupiter::JupiterDecoder;

pub const CPT_AMM: &str = "amm";
pub const CPT_AGGREGATOR: &str = "aggregator";
pub const CPT_JUPITER: &str = "jupiter";

/// `"Swap 1 WETH in AMM"` for spend legs, the receive wording otherwise.
pub(crate) fn trade_leg_notes(
    subtype: HistoryEventSubType,
    amount: Decimal,
    asset: &Asset,
    venue: &str,
) -> String {
    if subtype == HistoryEventSubType::Spend {
        format!("Swap {amount} {} {venue}", asset.symbol)
    } else {
        format!(
            "Receive {amount} {} as the result of a swap {venue}",
            asset.symbol
        )
    }
}

pub(crate) fn is_trade_leg_of<C: Chain>(event: &HistoryEvent<C>, counterparty: &str) -> bool {
    event.event_type == HistoryEventType::Trade
        && matches!(
            event.event_subtype,
            HistoryEventSubType::Spend | HistoryEventSubType::Receive
        )
        && event.counterparty.as_deref() == Some(counterparty)
}

fn base_tools<C: Chain>(
    settings: &ResolvedSettings<C>,
    node_inquirer: Arc<dyn NodeInquirer<C>>,
    msg_aggregator: Arc<dyn MessageAggregator>,
) -> Arc<BaseDecoderTools<C>> {
    Arc::new(BaseDecoderTools::new(
        settings.tracked_accounts.iter().copied(),
        settings.exchange_addresses.clone(),
        Arc::new(StaticAssetResolver::new(settings.tokens.clone())),
        node_inquirer,
        msg_aggregator,
    ))
}

/// EVM decoder with the AMM and aggregator decoders registered when their
/// settings are present.
pub fn evm_decoder(
    settings: &ResolvedSettings<Evm>,
    node_inquirer: Arc<dyn NodeInquirer<Evm>>,
    msg_aggregator: Arc<dyn MessageAggregator>,
) -> Result<TransactionDecoder<Evm>, Error> {
    let base = base_tools(settings, Arc::clone(&node_inquirer), msg_aggregator);
    let mut builder = TransactionDecoder::builder(base);
    if let Some(amm) = &settings.amm {
        builder = builder.register(AmmDecoder::new(amm, node_inquirer));
    }
    if let Some(router) = settings.aggregator_router {
        builder = builder.register(AggregatorDecoder::new(router));
    }
    builder.build()
}

/// Solana decoder with the Jupiter decoder registered.
pub fn solana_decoder(
    settings: &ResolvedSettings<Solana>,
    msg_aggregator: Arc<dyn MessageAggregator>,
) -> Result<TransactionDecoder<Solana>, Error> {
    let base = base_tools(settings, Arc::new(UnavailableNodeInquirer), msg_aggregator);
    TransactionDecoder::builder(base)
        .register(JupiterDecoder)
        .build()
}
