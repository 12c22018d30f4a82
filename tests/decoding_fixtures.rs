#![expect(
    clippy::unwrap_used,
    clippy::panic,
    reason = "test code uses unwrap/panic for concise assertions"
)]

use std::sync::Arc;

use chain_history_decoder::{
    CollectingMessageAggregator, DecoderSettings, Evm, EvmTransaction, HistoryEvent,
    HistoryEventSubType, HistoryEventType, RawEvmTransaction, RawSolanaTransaction, Solana,
    SolanaTransaction, TransactionDecoder, UnavailableNodeInquirer, evm_decoder, solana_decoder,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn read_fixture(filename: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let path = format!("{manifest_dir}/tests/fixtures/{filename}");
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {path}: {e}"))
}

fn load_evm_transactions() -> Vec<EvmTransaction> {
    let rows: Vec<RawEvmTransaction> = serde_json::from_str(&read_fixture("evm_transactions.json"))
        .unwrap_or_else(|e| panic!("failed to parse evm fixtures: {e}"));
    rows.into_iter()
        .map(|row| EvmTransaction::try_from(row).unwrap())
        .collect()
}

fn load_solana_transactions() -> Vec<SolanaTransaction> {
    let rows: Vec<RawSolanaTransaction> =
        serde_json::from_str(&read_fixture("solana_transactions.json"))
            .unwrap_or_else(|e| panic!("failed to parse solana fixtures: {e}"));
    rows.into_iter()
        .map(|row| SolanaTransaction::try_from(row).unwrap())
        .collect()
}

fn evm_setup() -> (TransactionDecoder<Evm>, Arc<CollectingMessageAggregator>) {
    let settings = DecoderSettings::from_json(&read_fixture("evm_settings.json")).unwrap();
    let aggregator = Arc::new(CollectingMessageAggregator::default());
    let decoder = evm_decoder(
        &settings.resolve::<Evm>().unwrap(),
        Arc::new(UnavailableNodeInquirer),
        aggregator.clone(),
    )
    .unwrap();
    (decoder, aggregator)
}

fn solana_setup() -> (TransactionDecoder<Solana>, Arc<CollectingMessageAggregator>) {
    let settings = DecoderSettings::from_json(&read_fixture("solana_settings.json")).unwrap();
    let aggregator = Arc::new(CollectingMessageAggregator::default());
    let decoder = solana_decoder(&settings.resolve::<Solana>().unwrap(), aggregator.clone()).unwrap();
    (decoder, aggregator)
}

fn indices<C: chain_history_decoder::Chain>(events: &[HistoryEvent<C>]) -> Vec<u64> {
    events.iter().map(|event| event.sequence_index).collect()
}

fn kinds<C: chain_history_decoder::Chain>(
    events: &[HistoryEvent<C>],
) -> Vec<(HistoryEventType, HistoryEventSubType)> {
    events
        .iter()
        .map(|event| (event.event_type, event.event_subtype))
        .collect()
}

// ──────────────────── EVM ────────────────────

#[test]
fn evm_router_swap_is_fee_spend_receive() {
    let (decoder, aggregator) = evm_setup();
    let txs = load_evm_transactions();
    let decoded = decoder.decode_transaction(&txs[0]);
    let events = &decoded.events;

    assert_eq!(indices(events), vec![0, 1, 2]);
    assert_eq!(
        kinds(events),
        vec![
            (HistoryEventType::Spend, HistoryEventSubType::Fee),
            (HistoryEventType::Trade, HistoryEventSubType::Spend),
            (HistoryEventType::Trade, HistoryEventSubType::Receive),
        ]
    );
    assert_eq!(events[0].amount, dec!(0.000000000000005));
    assert_eq!(events[0].counterparty.as_deref(), Some("gas"));
    assert_eq!(events[1].amount, dec!(1));
    assert_eq!(events[1].notes.as_deref(), Some("Swap 1 WETH via aggregator"));
    assert_eq!(events[2].amount, dec!(2000));
    assert_eq!(
        events[2].notes.as_deref(),
        Some("Receive 2000 USDC as the result of a swap via aggregator")
    );
    assert!(
        events[1..]
            .iter()
            .all(|event| event.counterparty.as_deref() == Some("aggregator")
                && event.address == txs[0].to_address)
    );
    assert!(aggregator.take_errors().is_empty());
    assert!(decoded.reload_decoders.is_none());
}

#[test]
fn evm_multi_hop_route_collapses_to_one_swap() {
    let (decoder, _) = evm_setup();
    let txs = load_evm_transactions();
    let events = decoder.decode_transaction(&txs[1]).events;

    assert_eq!(indices(&events), vec![0, 1, 2]);
    assert_eq!(events[0].amount, dec!(0.003));
    assert_eq!(events[1].asset.symbol, "WETH");
    assert_eq!(events[2].asset.symbol, "DAI");
    assert_eq!(events[2].amount, dec!(1990));
    assert_eq!(events[2].event_type, HistoryEventType::Trade);
}

#[test]
fn evm_failing_rule_is_rolled_back_and_reported() {
    let (decoder, aggregator) = evm_setup();
    let txs = load_evm_transactions();
    let events = decoder.decode_transaction(&txs[2]).events;

    let legs: Vec<_> = events
        .iter()
        .filter(|event| event.event_type == HistoryEventType::MultiTrade)
        .collect();
    assert_eq!(legs.len(), 4, "{events:#?}");
    assert!(legs.iter().all(|leg| leg.counterparty.as_deref() == Some("amm")));
    assert_eq!(indices(&events), vec![0, 1, 2, 3, 4]);

    let errors = aggregator.take_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("failed for aggregator"), "{errors:?}");
}

#[test]
fn evm_unlimited_approval() {
    let (decoder, _) = evm_setup();
    let txs = load_evm_transactions();
    let events = decoder.decode_transaction(&txs[3]).events;

    assert_eq!(indices(&events), vec![0, 1]);
    let approval = &events[1];
    assert_eq!(approval.event_type, HistoryEventType::Informational);
    assert_eq!(approval.event_subtype, HistoryEventSubType::Approve);
    assert_eq!(approval.amount, Decimal::MAX);
    assert_eq!(approval.location_label, Some(txs[3].from_address));
    let notes = approval.notes.as_deref().unwrap();
    assert!(notes.starts_with("Set USDC spending approval of"), "{notes}");
    assert!(notes.ends_with("to unlimited"), "{notes}");
}

#[test]
fn evm_failed_transaction_only_burns_gas() {
    let (decoder, _) = evm_setup();
    let txs = load_evm_transactions();
    let events = decoder.decode_transaction(&txs[4]).events;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, HistoryEventType::Fail);
    assert_eq!(events[0].event_subtype, HistoryEventSubType::Fee);
    assert_eq!(
        events[0].notes.as_deref(),
        Some("Burn 0.000021 ETH for gas of a failed transaction")
    );
}

#[test]
fn evm_deposit_to_exchange() {
    let (decoder, _) = evm_setup();
    let txs = load_evm_transactions();
    let events = decoder.decode_transaction(&txs[5]).events;

    assert_eq!(indices(&events), vec![0, 1]);
    let deposit = &events[1];
    assert_eq!(deposit.event_type, HistoryEventType::Deposit);
    assert_eq!(deposit.event_subtype, HistoryEventSubType::DepositAsset);
    assert_eq!(deposit.amount, dec!(1.5));
    assert_eq!(deposit.counterparty.as_deref(), Some("kraken"));
    assert_eq!(deposit.notes.as_deref(), Some("Deposit 1.5 ETH to kraken"));
}

#[test]
fn evm_decoding_is_deterministic() {
    let (decoder, _) = evm_setup();
    let txs = load_evm_transactions();
    let first = decoder.decode_transactions(&txs);
    let second = decoder.decode_transactions(&txs);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.events, b.events);
        assert_eq!(
            serde_json::to_string(&a.events).unwrap(),
            serde_json::to_string(&b.events).unwrap()
        );
    }
}

#[test]
fn evm_events_serialize_with_display_strings() {
    let (decoder, _) = evm_setup();
    let txs = load_evm_transactions();
    let events = decoder.decode_transaction(&txs[0]).events;
    let json = serde_json::to_value(&events[1]).unwrap();

    assert_eq!(json["location"], "ethereum");
    assert_eq!(json["event_type"], "trade");
    assert_eq!(json["event_subtype"], "spend");
    assert_eq!(json["sequence_index"], 1);
    assert_eq!(
        json["group_identifier"],
        "0x0101010101010101010101010101010101010101010101010101010101010101"
    );
    assert_eq!(json["asset"]["symbol"], "WETH");
}

// ──────────────────── Solana ────────────────────

#[test]
fn solana_split_jupiter_route_fuses_into_one_swap() {
    let (decoder, aggregator) = solana_setup();
    let txs = load_solana_transactions();
    let events = decoder.decode_transaction(&txs[0]).events;

    assert_eq!(indices(&events), vec![0, 2, 3]);
    assert_eq!(
        kinds(&events),
        vec![
            (HistoryEventType::Spend, HistoryEventSubType::Fee),
            (HistoryEventType::Trade, HistoryEventSubType::Spend),
            (HistoryEventType::Trade, HistoryEventSubType::Receive),
        ]
    );
    assert_eq!(
        events[0].notes.as_deref(),
        Some("Spend 0.000005 SOL as transaction fee")
    );
    assert_eq!(events[1].amount, dec!(100));
    assert_eq!(events[1].notes.as_deref(), Some("Swap 100 USDC in Jupiter"));
    assert_eq!(events[2].amount, dec!(0.7));
    assert_eq!(
        events[2].notes.as_deref(),
        Some("Receive 0.7 SOL as the result of a swap in Jupiter")
    );
    assert!(
        events[1..]
            .iter()
            .all(|event| event.counterparty.as_deref() == Some("jupiter"))
    );
    assert_eq!(events[2].address, events[1].address);
    assert!(aggregator.take_notifications().is_empty());
}

#[test]
fn solana_system_transfer_is_consumed_by_pre_decoding() {
    let (decoder, _) = solana_setup();
    let txs = load_solana_transactions();
    let events = decoder.decode_transaction(&txs[1]).events;

    assert_eq!(indices(&events), vec![0, 1]);
    assert_eq!(events[1].event_type, HistoryEventType::Spend);
    assert_eq!(events[1].amount, dec!(0.5));
    let notes = events[1].notes.as_deref().unwrap();
    assert!(notes.starts_with("Send 0.5 SOL to "), "{notes}");
}

#[test]
fn solana_failed_transaction_only_pays_fee() {
    let (decoder, _) = solana_setup();
    let txs = load_solana_transactions();
    let events = decoder.decode_transaction(&txs[2]).events;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_subtype, HistoryEventSubType::Fee);
}

#[test]
fn solana_unknown_mint_notifies_user() {
    let settings = DecoderSettings::from_json(&read_fixture("solana_settings.json")).unwrap();
    let mut resolved = settings.resolve::<Solana>().unwrap();
    resolved.tokens.retain(|_, asset| asset.symbol != "USDC");
    let aggregator = Arc::new(CollectingMessageAggregator::default());
    let decoder = solana_decoder(&resolved, aggregator.clone()).unwrap();

    let txs = load_solana_transactions();
    let events = decoder.decode_transaction(&txs[0]).events;
    assert_eq!(events.len(), 1, "only the fee survives");
    let notifications = aggregator.take_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].1, "jupiter");
}
