//! The decoding engine: routing table, per-run tools, post-decoding rule
//! chain and the orchestrator tying the phases together.

pub mod decoder;
pub mod interface;
pub mod output;
pub(crate) mod post_decoding;
pub mod reload;
pub mod reshuffle;
pub mod rules;
pub mod swaps;
pub mod tools;

pub use decoder::{DecodedTransaction, TransactionDecoder, TransactionDecoderBuilder};
pub use interface::{
    CounterpartyDetails, DecodeRoute, Decoder, DecoderContext, PostDecodingContext,
    PostDecodingRule,
};
pub use output::DecodingOutput;
pub use tools::{BaseDecoderTools, DecoderTools, Direction};
