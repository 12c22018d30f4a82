use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::chain::Chain;
use crate::decoding::output::DecodingOutput;
use crate::decoding::tools::DecoderTools;
use crate::error::Error;
use crate::events::{ActionItem, HistoryEvent};

/// Everything a decoding function may look at or touch for one unit.
pub struct DecoderContext<'a, 'b, C: Chain> {
    pub transaction: &'a C::Transaction,
    pub unit: &'a C::Unit,
    pub all_units: &'a [C::Unit],
    /// Events decoded so far in this run. Decoders may append auxiliary
    /// events here in addition to the one they return.
    pub decoded_events: &'a mut Vec<HistoryEvent<C>>,
    pub action_items: &'a [ActionItem<C>],
    pub tools: &'a mut DecoderTools<'b, C>,
}

pub type DecodeFn<C> = Arc<
    dyn Fn(&mut DecoderContext<'_, '_, C>, &serde_json::Value) -> Result<DecodingOutput<C>, Error>
        + Send
        + Sync,
>;

/// A decoding function bound to a routing address, with optional static
/// arguments passed on every call.
pub struct DecodeRoute<C: Chain> {
    handler: DecodeFn<C>,
    args: serde_json::Value,
}

impl<C: Chain> Clone for DecodeRoute<C> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            args: self.args.clone(),
        }
    }
}

impl<C: Chain> fmt::Debug for DecodeRoute<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeRoute")
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl<C: Chain> DecodeRoute<C> {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut DecoderContext<'_, '_, C>, &serde_json::Value) -> Result<DecodingOutput<C>, Error>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Arc::new(handler),
            args: serde_json::Value::Null,
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn call(&self, ctx: &mut DecoderContext<'_, '_, C>) -> Result<DecodingOutput<C>, Error> {
        (self.handler)(ctx, &self.args)
    }
}

/// What post-decoding rules get besides the event list.
pub struct PostDecodingContext<'a, 'b, C: Chain> {
    pub transaction: &'a C::Transaction,
    pub all_units: &'a [C::Unit],
    pub tools: &'a mut DecoderTools<'b, C>,
}

pub type PostDecodingFn<C> = Arc<
    dyn Fn(
            &mut PostDecodingContext<'_, '_, C>,
            Vec<HistoryEvent<C>>,
        ) -> Result<Vec<HistoryEvent<C>>, Error>
        + Send
        + Sync,
>;

/// A whole-transaction rewrite keyed by counterparty. Lower priorities run
/// first.
pub struct PostDecodingRule<C: Chain> {
    pub priority: i32,
    rule: PostDecodingFn<C>,
}

impl<C: Chain> Clone for PostDecodingRule<C> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            rule: Arc::clone(&self.rule),
        }
    }
}

impl<C: Chain> fmt::Debug for PostDecodingRule<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostDecodingRule")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl<C: Chain> PostDecodingRule<C> {
    pub fn new<F>(priority: i32, rule: F) -> Self
    where
        F: Fn(
                &mut PostDecodingContext<'_, '_, C>,
                Vec<HistoryEvent<C>>,
            ) -> Result<Vec<HistoryEvent<C>>, Error>
            + Send
            + Sync
            + 'static,
    {
        Self {
            priority,
            rule: Arc::new(rule),
        }
    }

    pub fn apply(
        &self,
        ctx: &mut PostDecodingContext<'_, '_, C>,
        events: Vec<HistoryEvent<C>>,
    ) -> Result<Vec<HistoryEvent<C>>, Error> {
        (self.rule)(ctx, events)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct CounterpartyDetails {
    pub identifier: String,
    pub label: String,
}

impl CounterpartyDetails {
    pub fn new(identifier: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            label: label.into(),
        }
    }
}

/// A protocol decoder. Contributes routes, counterparties and post-decoding
/// rules to the chain's routing table when registered.
pub trait Decoder<C: Chain>: Send + Sync {
    /// Unique within one transaction decoder; used in reload requests.
    fn name(&self) -> &'static str;

    fn counterparties(&self) -> Vec<CounterpartyDetails>;

    fn addresses_to_decoders(&self) -> HashMap<C::Address, DecodeRoute<C>> {
        HashMap::new()
    }

    /// Addresses that imply this decoder's counterparty whenever a
    /// transaction is sent to them.
    fn addresses_to_counterparties(&self) -> HashMap<C::Address, String> {
        HashMap::new()
    }

    fn post_decoding_rules(&self) -> HashMap<String, Vec<PostDecodingRule<C>>> {
        HashMap::new()
    }

    /// Refreshes cached protocol data. `Some` carries the new or changed
    /// routes to merge into the routing table.
    fn reload_data(&self) -> Result<Option<HashMap<C::Address, DecodeRoute<C>>>, Error> {
        Ok(None)
    }
}
