//! Shared decoder helpers and the per-run sequence index bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;

use crate::chain::{Chain, ChainTransaction, RawUnit};
use crate::collaborators::{AssetResolver, MessageAggregator, NodeInquirer};
use crate::error::Error;
use crate::events::{HistoryEvent, HistoryEventSubType, HistoryEventType};
use crate::types::{Asset, TimestampMs};

/// Classification of a value movement between two addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Direction<C: Chain> {
    pub event_type: HistoryEventType,
    pub event_subtype: HistoryEventSubType,
    /// The tracked side.
    pub location_label: C::Address,
    /// The other side.
    pub address: Option<C::Address>,
    /// Exchange name when the other side is a known exchange.
    pub counterparty: Option<String>,
    /// `"Send"`, `"Receive"`, `"Transfer"`, `"Deposit"` or `"Withdraw"`.
    pub verb: &'static str,
}

/// Helpers shared by every decoder of one chain, living as long as the
/// transaction decoder itself.
pub struct BaseDecoderTools<C: Chain> {
    tracked_accounts: RwLock<Arc<HashSet<C::Address>>>,
    exchange_addresses: HashMap<C::Address, String>,
    asset_resolver: Arc<dyn AssetResolver<C>>,
    node_inquirer: Arc<dyn NodeInquirer<C>>,
    msg_aggregator: Arc<dyn MessageAggregator>,
}

impl<C: Chain> BaseDecoderTools<C> {
    pub fn new(
        tracked_accounts: impl IntoIterator<Item = C::Address>,
        exchange_addresses: HashMap<C::Address, String>,
        asset_resolver: Arc<dyn AssetResolver<C>>,
        node_inquirer: Arc<dyn NodeInquirer<C>>,
        msg_aggregator: Arc<dyn MessageAggregator>,
    ) -> Self {
        Self {
            tracked_accounts: RwLock::new(Arc::new(tracked_accounts.into_iter().collect())),
            exchange_addresses,
            asset_resolver,
            node_inquirer,
            msg_aggregator,
        }
    }

    /// Replaces the tracked-account set. Runs already in flight keep the
    /// snapshot they started with only for calls made before the swap.
    pub fn refresh_tracked_accounts(&self, accounts: impl IntoIterator<Item = C::Address>) {
        let accounts: HashSet<C::Address> = accounts.into_iter().collect();
        tracing::debug!(
            chain = C::LOCATION.as_ref(),
            count = accounts.len(),
            "tracked accounts refreshed"
        );
        let mut guard = self
            .tracked_accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(accounts);
    }

    fn tracked(&self) -> Arc<HashSet<C::Address>> {
        Arc::clone(
            &self
                .tracked_accounts
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn is_tracked(&self, address: &C::Address) -> bool {
        self.tracked().contains(address)
    }

    pub fn any_tracked(&self, addresses: &[C::Address]) -> bool {
        let tracked = self.tracked();
        addresses.iter().any(|address| tracked.contains(address))
    }

    pub fn exchange_name(&self, address: &C::Address) -> Option<&str> {
        self.exchange_addresses.get(address).map(String::as_str)
    }

    /// Classifies a movement from `from` to `to` relative to the tracked
    /// accounts. `None` when neither side is tracked.
    pub fn decode_direction(
        &self,
        from: &C::Address,
        to: Option<&C::Address>,
    ) -> Option<Direction<C>> {
        let tracked = self.tracked();
        let from_tracked = tracked.contains(from);
        let to_tracked = to.is_some_and(|to| tracked.contains(to));

        match (from_tracked, to_tracked) {
            (true, true) => Some(Direction {
                event_type: HistoryEventType::Transfer,
                event_subtype: HistoryEventSubType::None,
                location_label: *from,
                address: to.copied(),
                counterparty: None,
                verb: "Transfer",
            }),
            (true, false) => {
                let exchange = to.and_then(|to| self.exchange_name(to));
                Some(match exchange {
                    Some(name) => Direction {
                        event_type: HistoryEventType::Deposit,
                        event_subtype: HistoryEventSubType::DepositAsset,
                        location_label: *from,
                        address: to.copied(),
                        counterparty: Some(name.to_owned()),
                        verb: "Deposit",
                    },
                    None => Direction {
                        event_type: HistoryEventType::Spend,
                        event_subtype: HistoryEventSubType::None,
                        location_label: *from,
                        address: to.copied(),
                        counterparty: None,
                        verb: "Send",
                    },
                })
            }
            (false, true) => {
                let to = *to?;
                Some(match self.exchange_name(from) {
                    Some(name) => Direction {
                        event_type: HistoryEventType::Withdrawal,
                        event_subtype: HistoryEventSubType::RemoveAsset,
                        location_label: to,
                        address: Some(*from),
                        counterparty: Some(name.to_owned()),
                        verb: "Withdraw",
                    },
                    None => Direction {
                        event_type: HistoryEventType::Receive,
                        event_subtype: HistoryEventSubType::None,
                        location_label: to,
                        address: Some(*from),
                        counterparty: None,
                        verb: "Receive",
                    },
                })
            }
            (false, false) => None,
        }
    }

    pub fn resolve_token(&self, address: &C::Address) -> Result<Asset, Error> {
        self.asset_resolver.resolve_token(address)
    }

    pub fn node_inquirer(&self) -> &dyn NodeInquirer<C> {
        self.node_inquirer.as_ref()
    }

    pub fn msg_aggregator(&self) -> &dyn MessageAggregator {
        self.msg_aggregator.as_ref()
    }
}

/// Per-run tools handed to decoders. Owns the sequence counter of the
/// transaction being decoded.
///
/// Index pools: pre-decoding indices count up from 0; once the first
/// decoding-phase index is requested the pre-decoding count `k` is frozen,
/// unit-anchored indices become `k + unit_index` and free-standing ones
/// `counter + offset`, where the offset exceeds every unit index.
pub struct DecoderTools<'a, C: Chain> {
    base: &'a BaseDecoderTools<C>,
    group_identifier: C::TxRef,
    timestamp: TimestampMs,
    sequence_counter: u64,
    sequence_offset: u64,
    pre_decoding_count: Option<u64>,
}

impl<'a, C: Chain> DecoderTools<'a, C> {
    pub fn new(base: &'a BaseDecoderTools<C>, tx: &C::Transaction) -> Self {
        Self {
            base,
            group_identifier: tx.tx_ref(),
            timestamp: tx.timestamp(),
            sequence_counter: 0,
            sequence_offset: tx.sequence_offset(),
            pre_decoding_count: None,
        }
    }

    pub fn base(&self) -> &'a BaseDecoderTools<C> {
        self.base
    }

    /// Rebinds the tools to `tx` and restarts every index pool.
    pub fn reset_sequence_counter(&mut self, tx: &C::Transaction) {
        self.group_identifier = tx.tx_ref();
        self.timestamp = tx.timestamp();
        self.sequence_counter = 0;
        self.sequence_offset = tx.sequence_offset();
        self.pre_decoding_count = None;
    }

    pub fn next_pre_decoding_index(&mut self) -> u64 {
        debug_assert!(
            self.pre_decoding_count.is_none(),
            "pre-decoding index requested after decoding indices were issued"
        );
        let index = self.sequence_counter;
        self.sequence_counter += 1;
        index
    }

    fn freeze_pre_decoding(&mut self) -> u64 {
        *self
            .pre_decoding_count
            .get_or_insert(self.sequence_counter)
    }

    /// Next free-standing index, above every unit-anchored one.
    pub fn next_decoding_index(&mut self) -> u64 {
        self.freeze_pre_decoding();
        let index = self.sequence_counter + self.sequence_offset;
        self.sequence_counter += 1;
        index
    }

    /// Index anchored to the unit's own position. Use at most once per unit.
    pub fn sequence_index_for_unit(&mut self, unit: &C::Unit) -> u64 {
        self.freeze_pre_decoding() + unit.unit_index()
    }

    pub fn make_event(
        &self,
        sequence_index: u64,
        event_type: HistoryEventType,
        event_subtype: HistoryEventSubType,
        asset: Asset,
        amount: Decimal,
    ) -> HistoryEvent<C> {
        HistoryEvent {
            group_identifier: self.group_identifier.clone(),
            sequence_index,
            timestamp: self.timestamp,
            location: C::LOCATION,
            event_type,
            event_subtype,
            asset,
            amount,
            location_label: None,
            notes: None,
            counterparty: None,
            address: None,
            extra_data: None,
        }
    }

    pub fn make_event_next_index(
        &mut self,
        event_type: HistoryEventType,
        event_subtype: HistoryEventSubType,
        asset: Asset,
        amount: Decimal,
    ) -> HistoryEvent<C> {
        let sequence_index = self.next_decoding_index();
        self.make_event(sequence_index, event_type, event_subtype, asset, amount)
    }

    pub fn make_event_for_unit(
        &mut self,
        unit: &C::Unit,
        event_type: HistoryEventType,
        event_subtype: HistoryEventSubType,
        asset: Asset,
        amount: Decimal,
    ) -> HistoryEvent<C> {
        let sequence_index = self.sequence_index_for_unit(unit);
        self.make_event(sequence_index, event_type, event_subtype, asset, amount)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::chain::evm::{Evm, EvmLog, EvmTransaction};
    use crate::collaborators::{LoggingMessageAggregator, StaticAssetResolver, UnavailableNodeInquirer};
    use alloy_primitives::{Address, B256, U256};

    fn base(tracked: &[Address], exchanges: &[(Address, &str)]) -> BaseDecoderTools<Evm> {
        BaseDecoderTools::new(
            tracked.iter().copied(),
            exchanges
                .iter()
                .map(|(address, name)| (*address, (*name).to_owned()))
                .collect(),
            Arc::new(StaticAssetResolver::default()),
            Arc::new(UnavailableNodeInquirer),
            Arc::new(LoggingMessageAggregator),
        )
    }

    fn tx_with_logs(indices: &[u64]) -> EvmTransaction {
        EvmTransaction {
            tx_hash: B256::repeat_byte(1),
            timestamp: 1,
            from_address: Address::repeat_byte(0xaa),
            to_address: Some(Address::repeat_byte(0xbb)),
            value: U256::ZERO,
            gas_used: 0,
            gas_price: 0,
            success: true,
            logs: indices
                .iter()
                .map(|&log_index| EvmLog {
                    address: Address::repeat_byte(0xcc),
                    topics: vec![],
                    data: Default::default(),
                    log_index,
                })
                .collect(),
        }
    }

    #[test]
    fn direction_covers_every_tracked_combination() {
        let me = Address::repeat_byte(1);
        let friend = Address::repeat_byte(2);
        let stranger = Address::repeat_byte(3);
        let exchange = Address::repeat_byte(4);
        let tools = base(&[me, friend], &[(exchange, "kraken")]);

        let transfer = tools.decode_direction(&me, Some(&friend)).unwrap();
        assert_eq!(transfer.event_type, HistoryEventType::Transfer);
        assert_eq!(transfer.verb, "Transfer");

        let spend = tools.decode_direction(&me, Some(&stranger)).unwrap();
        assert_eq!(spend.event_type, HistoryEventType::Spend);
        assert_eq!(spend.location_label, me);
        assert_eq!(spend.address, Some(stranger));

        let deposit = tools.decode_direction(&me, Some(&exchange)).unwrap();
        assert_eq!(deposit.event_type, HistoryEventType::Deposit);
        assert_eq!(deposit.event_subtype, HistoryEventSubType::DepositAsset);
        assert_eq!(deposit.counterparty.as_deref(), Some("kraken"));

        let receive = tools.decode_direction(&stranger, Some(&me)).unwrap();
        assert_eq!(receive.event_type, HistoryEventType::Receive);
        assert_eq!(receive.location_label, me);
        assert_eq!(receive.address, Some(stranger));

        let withdrawal = tools.decode_direction(&exchange, Some(&me)).unwrap();
        assert_eq!(withdrawal.event_type, HistoryEventType::Withdrawal);
        assert_eq!(withdrawal.verb, "Withdraw");

        assert!(tools.decode_direction(&stranger, Some(&exchange)).is_none());
        assert!(tools.decode_direction(&stranger, None).is_none());
    }

    #[test]
    fn refresh_replaces_tracked_set() {
        let me = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let tools = base(&[me], &[]);
        assert!(tools.is_tracked(&me));
        tools.refresh_tracked_accounts([other]);
        assert!(!tools.is_tracked(&me));
        assert!(tools.any_tracked(&[me, other]));
    }

    #[test]
    fn index_pools_never_overlap() {
        let base = base(&[], &[]);
        let tx = tx_with_logs(&[0, 1, 2, 5]);
        let mut tools = DecoderTools::new(&base, &tx);

        let fee = tools.next_pre_decoding_index();
        let transfer = tools.next_pre_decoding_index();
        assert_eq!((fee, transfer), (0, 1));

        let mut issued = vec![fee, transfer];
        for log in &tx.logs {
            issued.push(tools.sequence_index_for_unit(log));
        }
        for _ in 0..4 {
            issued.push(tools.next_decoding_index());
        }
        assert_eq!(issued[2..6], [2, 3, 4, 7]);
        let unique: HashSet<u64> = issued.iter().copied().collect();
        assert_eq!(unique.len(), issued.len());
    }

    #[test]
    fn swap_scenario_indices() {
        let base = base(&[], &[]);
        let tx = tx_with_logs(&[0]);
        let mut tools = DecoderTools::new(&base, &tx);

        assert_eq!(tools.next_pre_decoding_index(), 0);
        assert_eq!(tools.sequence_index_for_unit(&tx.logs[0]), 1);
        assert_eq!(tools.next_decoding_index(), 2);
    }

    #[test]
    fn reset_restarts_counter() {
        let base = base(&[], &[]);
        let tx = tx_with_logs(&[0, 1]);
        let mut tools = DecoderTools::new(&base, &tx);
        tools.next_pre_decoding_index();
        tools.next_decoding_index();
        tools.reset_sequence_counter(&tx);
        assert_eq!(tools.next_pre_decoding_index(), 0);
    }

    #[test]
    #[should_panic(expected = "pre-decoding index requested after decoding")]
    #[cfg(debug_assertions)]
    fn pre_decoding_after_decoding_is_caught() {
        let base = base(&[], &[]);
        let tx = tx_with_logs(&[0]);
        let mut tools = DecoderTools::new(&base, &tx);
        tools.next_decoding_index();
        tools.next_pre_decoding_index();
    }
}
