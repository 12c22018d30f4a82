//! The per-chain transaction decoder: owns the registered decoders, the
//! routing table snapshot and drives the decoding phases for one
//! transaction at a time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::chain::{BuiltinRule, Chain, ChainTransaction, PreDecodingOutput, RawUnit};
use crate::decoding::interface::{CounterpartyDetails, Decoder, DecoderContext, PostDecodingContext};
use crate::decoding::output::DecodingOutput;
use crate::decoding::post_decoding::run_all_post_decoding_rules;
use crate::decoding::reload::ReloadTracker;
use crate::decoding::rules::DecodingRules;
use crate::decoding::swaps::process_swaps;
use crate::decoding::tools::{BaseDecoderTools, DecoderTools};
use crate::error::Error;
use crate::events::action_item::append_with_action_items;
use crate::events::{ActionItem, HistoryEvent};

/// Result of decoding one transaction.
#[derive(Debug)]
pub struct DecodedTransaction<C: Chain> {
    /// Events ordered by sequence index.
    pub events: Vec<HistoryEvent<C>>,
    pub refresh_balances: bool,
    /// Decoders some unit asked to have reloaded.
    pub reload_decoders: Option<HashSet<String>>,
}

/// Collects decoders before the routing table is built.
pub struct TransactionDecoderBuilder<C: Chain> {
    base: Arc<BaseDecoderTools<C>>,
    decoders: Vec<Box<dyn Decoder<C>>>,
}

impl<C: Chain> TransactionDecoderBuilder<C> {
    pub fn new(base: Arc<BaseDecoderTools<C>>) -> Self {
        Self {
            base,
            decoders: Vec::new(),
        }
    }

    pub fn register(mut self, decoder: impl Decoder<C> + 'static) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    pub fn register_boxed(mut self, decoders: impl IntoIterator<Item = Box<dyn Decoder<C>>>) -> Self {
        self.decoders.extend(decoders);
        self
    }

    /// Builds the routing table. Fails on duplicate decoder names or on a
    /// routing address claimed by two decoders.
    pub fn build(self) -> Result<TransactionDecoder<C>, Error> {
        let mut rules = DecodingRules::default();
        let mut names = HashSet::new();
        for decoder in &self.decoders {
            if !names.insert(decoder.name()) {
                return Err(Error::Load {
                    reason: format!("decoder {} registered twice", decoder.name()),
                });
            }
            rules.add_decoder(decoder.as_ref())?;
        }
        tracing::info!(
            chain = C::LOCATION.as_ref(),
            decoders = self.decoders.len(),
            routes = rules.route_count(),
            "transaction decoder initialized"
        );
        Ok(TransactionDecoder {
            base: self.base,
            decoders: self.decoders,
            rules: RwLock::new(Arc::new(rules)),
            builtin_rules: C::builtin_rules(),
            reload_tracker: ReloadTracker::default(),
        })
    }
}

/// Decodes raw transactions of chain `C` into history events.
///
/// Safe to share between threads: every decode works on its own per-run
/// state and a snapshot of the routing table taken when it starts.
pub struct TransactionDecoder<C: Chain> {
    base: Arc<BaseDecoderTools<C>>,
    decoders: Vec<Box<dyn Decoder<C>>>,
    rules: RwLock<Arc<DecodingRules<C>>>,
    builtin_rules: Vec<BuiltinRule<C>>,
    reload_tracker: ReloadTracker<C>,
}

/// Mutable state threaded through the decoding phase of one run.
struct RunState<C: Chain> {
    events: Vec<HistoryEvent<C>>,
    action_items: Vec<ActionItem<C>>,
    counterparties: BTreeSet<String>,
    refresh_balances: bool,
    reload_decoders: Option<HashSet<String>>,
    process_swaps: bool,
}

impl<C: Chain> RunState<C> {
    fn absorb(&mut self, output: DecodingOutput<C>) {
        self.refresh_balances |= output.refresh_balances;
        self.process_swaps |= output.process_swaps;
        if let Some(names) = output.reload_decoders {
            self.reload_decoders.get_or_insert_with(HashSet::new).extend(names);
        }
        if let Some(counterparty) = output.matched_counterparty {
            self.counterparties.insert(counterparty);
        }
        if let Some(event) = output.event {
            append_with_action_items(&mut self.action_items, event, &mut self.events);
        }
        self.action_items.extend(output.action_items);
    }
}

impl<C: Chain> TransactionDecoder<C> {
    pub fn builder(base: Arc<BaseDecoderTools<C>>) -> TransactionDecoderBuilder<C> {
        TransactionDecoderBuilder::new(base)
    }

    pub fn base(&self) -> &BaseDecoderTools<C> {
        &self.base
    }

    fn rules_snapshot(&self) -> Arc<DecodingRules<C>> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn counterparties(&self) -> Vec<CounterpartyDetails> {
        self.rules_snapshot().all_counterparties().cloned().collect()
    }

    /// Decodes `tx` into its history events.
    ///
    /// Failures of individual units and post-decoding rules are logged,
    /// reported to the message aggregator and skipped; they never abort the
    /// run.
    pub fn decode_transaction(&self, tx: &C::Transaction) -> DecodedTransaction<C> {
        let tx_ref = tx.tx_ref();
        tracing::debug!(
            chain = C::LOCATION.as_ref(),
            tx = %tx_ref,
            units = tx.units().len(),
            "starting transaction decoding"
        );
        let rules = self.rules_snapshot();
        let mut tools = DecoderTools::new(&self.base, tx);

        let PreDecodingOutput {
            events,
            consumed_units,
        } = C::pre_decode(&mut tools, tx);
        let mut state = RunState {
            events,
            action_items: Vec::new(),
            counterparties: BTreeSet::new(),
            refresh_balances: false,
            reload_decoders: None,
            process_swaps: false,
        };

        for unit in tx.units() {
            if consumed_units.contains(&unit.unit_index()) {
                continue;
            }
            for output in self.decode_unit(&rules, tx, unit, &mut state, &mut tools) {
                state.absorb(output);
            }
        }
        if !state.action_items.is_empty() {
            tracing::trace!(
                tx = %tx_ref,
                remaining = state.action_items.len(),
                "discarding unmatched action items"
            );
        }

        for event in &state.events {
            if let Some(counterparty) = &event.counterparty {
                state.counterparties.insert(counterparty.clone());
            }
        }
        if let Some(to) = tx.to_address()
            && let Some(counterparty) = rules.counterparty_for_address(&to)
        {
            state.counterparties.insert(counterparty.to_owned());
        }

        let mut post_ctx = PostDecodingContext {
            transaction: tx,
            all_units: tx.units(),
            tools: &mut tools,
        };
        let (mut events, rules_applied) = run_all_post_decoding_rules(
            &rules,
            &mut post_ctx,
            std::mem::take(&mut state.events),
            &state.counterparties,
            self.base.msg_aggregator(),
        );

        if events.is_empty()
            && let Some(event) = C::fallback_event(&mut tools, tx)
        {
            events.push(event);
        }

        events.sort_by_key(|event| event.sequence_index);
        if state.process_swaps || rules_applied {
            events = process_swaps(events);
        }
        debug_assert!(
            crate::events::has_unique_sequence_indices(&events),
            "duplicate sequence index in decoded transaction"
        );

        if let Some(names) = &state.reload_decoders {
            self.reload_tracker.record(&tx_ref, names);
        }
        if state.refresh_balances {
            tracing::debug!(chain = C::LOCATION.as_ref(), tx = %tx_ref, "balances need refreshing");
        }
        tracing::debug!(
            chain = C::LOCATION.as_ref(),
            tx = %tx_ref,
            events = events.len(),
            "finished transaction decoding"
        );

        DecodedTransaction {
            events,
            refresh_balances: state.refresh_balances,
            reload_decoders: state.reload_decoders,
        }
    }

    /// Decodes every transaction in order.
    pub fn decode_transactions<'t>(
        &self,
        txs: impl IntoIterator<Item = &'t C::Transaction>,
    ) -> Vec<DecodedTransaction<C>> {
        txs.into_iter().map(|tx| self.decode_transaction(tx)).collect()
    }

    /// Routed decoder first; built-in rules only when the route produced no
    /// event. A route without an event may still contribute action items and
    /// flags. A failing route skips the unit.
    fn decode_unit(
        &self,
        rules: &DecodingRules<C>,
        tx: &C::Transaction,
        unit: &C::Unit,
        state: &mut RunState<C>,
        tools: &mut DecoderTools<'_, C>,
    ) -> Vec<DecodingOutput<C>> {
        let mut outputs = Vec::new();
        if let Some(entry) = rules.route_for(&unit.routing_address()) {
            let mut ctx = DecoderContext {
                transaction: tx,
                unit,
                all_units: tx.units(),
                decoded_events: &mut state.events,
                action_items: &state.action_items,
                tools: &mut *tools,
            };
            match entry.route.call(&mut ctx) {
                Ok(output) => {
                    let decoded = output.event.is_some();
                    outputs.push(output);
                    if decoded {
                        return outputs;
                    }
                }
                Err(e) => {
                    self.report_unit_failure(tx, unit, entry.decoder, &e);
                    return outputs;
                }
            }
        }

        for rule in &self.builtin_rules {
            let mut ctx = DecoderContext {
                transaction: tx,
                unit,
                all_units: tx.units(),
                decoded_events: &mut state.events,
                action_items: &state.action_items,
                tools: &mut *tools,
            };
            match rule(&mut ctx) {
                Ok(output) if output.is_empty() => {}
                Ok(output) => {
                    outputs.push(output);
                    break;
                }
                Err(e) => {
                    self.report_unit_failure(tx, unit, "builtin", &e);
                    break;
                }
            }
        }
        outputs
    }

    fn report_unit_failure(&self, tx: &C::Transaction, unit: &C::Unit, decoder: &str, e: &Error) {
        let tx_ref = tx.tx_ref();
        tracing::error!(
            chain = C::LOCATION.as_ref(),
            tx = %tx_ref,
            unit = unit.unit_index(),
            decoder,
            recoverable = e.is_recoverable(),
            error = %e,
            "unit decoding failed, skipping"
        );
        self.base.msg_aggregator().add_error(&format!(
            "Decoding of transaction {tx_ref} in {} failed. Check logs for more details",
            C::LOCATION,
        ));
    }

    /// Refreshes every decoder's cached data and merges the route deltas.
    /// A conflicting delta does not stop the remaining decoders; the first
    /// conflict is returned once all of them ran.
    pub fn reload_data(&self) -> Result<(), Error> {
        let mut first_conflict = None;
        for decoder in &self.decoders {
            if let Err(e) = self.reload_single_decoder(decoder.as_ref()) {
                first_conflict.get_or_insert(e);
            }
        }
        first_conflict.map_or(Ok(()), Err)
    }

    /// Reloads only the named decoders. Unknown names are logged and skipped.
    pub fn reload_decoders(&self, names: &HashSet<String>) -> Result<(), Error> {
        let mut first_conflict = None;
        let by_name: HashMap<&str, &dyn Decoder<C>> = self
            .decoders
            .iter()
            .map(|decoder| (decoder.name(), decoder.as_ref()))
            .collect();
        for name in names {
            let Some(decoder) = by_name.get(name.as_str()) else {
                tracing::warn!(
                    chain = C::LOCATION.as_ref(),
                    decoder = name.as_str(),
                    "requested reloading of data for unknown decoder"
                );
                continue;
            };
            if let Err(e) = self.reload_single_decoder(*decoder) {
                first_conflict.get_or_insert(e);
            }
        }
        first_conflict.map_or(Ok(()), Err)
    }

    fn reload_single_decoder(&self, decoder: &dyn Decoder<C>) -> Result<(), Error> {
        let name = decoder.name();
        let routes = match decoder.reload_data() {
            Ok(Some(routes)) => routes,
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                let label = decoder
                    .counterparties()
                    .first()
                    .map_or_else(|| name.to_owned(), |details| details.label.clone());
                tracing::error!(
                    chain = C::LOCATION.as_ref(),
                    decoder = name,
                    error = %e,
                    "failed to query remote information for {label}"
                );
                self.base.msg_aggregator().add_error(&format!(
                    "Failed to update cache for {label} due to a network error. \
                     A re-decoding might be required if information was not up to date."
                ));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let route_count = routes.len();
        {
            let mut guard = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            let next = guard.with_reloaded_routes(name, routes, decoder.addresses_to_counterparties())?;
            *guard = Arc::new(next);
        }
        let marked = self.reload_tracker.mark_reloaded(name);
        tracing::info!(
            chain = C::LOCATION.as_ref(),
            decoder = name,
            routes = route_count,
            redecode = marked,
            "decoder data reloaded"
        );
        Ok(())
    }

    /// Transactions to decode again because a decoder they depended on has
    /// been reloaded since. Drains the set.
    pub fn take_pending_redecodes(&self) -> Vec<C::TxRef> {
        self.reload_tracker.take_pending()
    }
}
