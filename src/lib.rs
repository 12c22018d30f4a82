#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::dbg_macro,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::panic,
    )
)]

pub mod chain;
pub mod collaborators;
pub mod config;
pub mod decoding;
pub mod error;
pub mod events;
pub mod protocols;
pub mod types;

pub use chain::evm::{Evm, EvmLog, EvmTransaction};
pub use chain::solana::{Solana, SolanaInstruction, SolanaTransaction};
pub use chain::{Chain, ChainTransaction, Location, RawUnit};
pub use collaborators::{
    AssetResolver, CollectingMessageAggregator, LoggingMessageAggregator, MessageAggregator,
    NodeInquirer, StaticAssetResolver, UnavailableNodeInquirer,
};
pub use config::{DecoderSettings, ResolvedSettings};
pub use decoding::{
    DecodedTransaction, Decoder, DecodingOutput, TransactionDecoder, TransactionDecoderBuilder,
};
pub use error::Error;
pub use events::{ActionItem, HistoryEvent, HistoryEventSubType, HistoryEventType};
pub use protocols::{evm_decoder, solana_decoder};
pub use types::{Asset, RawEvmTransaction, RawSolanaTransaction};
