//! End-to-end flows against a temp database with injected ticks.
//!
//! No network anywhere: entries use LIMIT pricing, manual closes read
//! the seeded price cache and ticks go straight into the engine.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use paper_perps::engine::models::{
    CreatePositionRequest, EntryType, EventKind, FillType, PositionStatus, SettingsUpdate, Side,
    SizeMode, SlTpMode, UpdateSlTpRequest,
};
use paper_perps::{
    AppError, Broker, EngineMetrics, ExchangeRest, MarkPriceTick, PriceFeed, Store, TriggerEngine,
};

struct Stack {
    store: Arc<Store>,
    feed: PriceFeed,
    engine: Arc<TriggerEngine>,
    broker: Broker,
}

async fn stack(dir: &TempDir) -> Stack {
    let path = dir.path().join("flow.db");
    let store = Arc::new(Store::new(path.to_str().unwrap()).await.unwrap());
    let feed = PriceFeed::new("wss://example.invalid/ws");
    let engine = Arc::new(TriggerEngine::new(
        store.clone(),
        feed.clone(),
        EngineMetrics::detached(),
    ));
    let rest = ExchangeRest::new("http://127.0.0.1:0").unwrap();
    let broker = Broker::new(store.clone(), feed.clone(), rest, "USDT".to_string());
    Stack {
        store,
        feed,
        engine,
        broker,
    }
}

fn tick(symbol: &str, price: Decimal) -> MarkPriceTick {
    MarkPriceTick {
        symbol: symbol.to_string(),
        mark_price: price,
        ts: Utc::now(),
    }
}

fn limit_request(
    symbol: &str,
    side: Side,
    size_mode: SizeMode,
    size_value: Decimal,
    limit_price: Decimal,
    leverage: u32,
) -> CreatePositionRequest {
    CreatePositionRequest {
        symbol: symbol.to_string(),
        side,
        size_mode,
        size_value,
        leverage,
        entry_type: EntryType::Limit,
        limit_price: Some(limit_price),
        sl: None,
        tp: None,
        sl_mode: None,
        tp_mode: None,
        notes: None,
    }
}

#[tokio::test]
async fn long_position_wins_on_take_profit() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let mut req = limit_request("BTCUSDT", Side::Long, SizeMode::Usdt, dec!(1000), dec!(100), 1);
    req.sl = Some(dec!(5));
    req.sl_mode = Some(SlTpMode::Percent);
    req.tp = Some(dec!(10));
    req.tp_mode = Some(SlTpMode::Percent);

    let position = s.broker.create_position(req).await.unwrap();
    assert_eq!(position.qty, dec!(10));
    assert_eq!(position.sl, Some(dec!(95.00)));
    assert_eq!(position.tp, Some(dec!(110.00)));
    assert_eq!(position.fees_open, dec!(0.4));
    assert_eq!(s.feed.subscribed_symbols(), vec!["BTCUSDT"]);

    let mut triggers = s.engine.subscribe_triggers();

    s.engine.on_tick(tick("BTCUSDT", dec!(101))).await;
    s.engine.on_tick(tick("BTCUSDT", dec!(105))).await;
    let still_open = s.store.get_position(position.id).await.unwrap().unwrap();
    assert_eq!(still_open.status, PositionStatus::Open);

    s.engine.on_tick(tick("BTCUSDT", dec!(110))).await;

    let closed = s.store.get_position(position.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.close_price, Some(dec!(110)));
    assert_eq!(closed.fees_close, Some(dec!(0.44)));
    assert_eq!(closed.realized_pnl, Some(dec!(99.16)));
    assert_eq!(closed.funding_pnl, Some(Decimal::ZERO));

    let executed = triggers.try_recv().unwrap();
    assert_eq!(executed.position_id, position.id);
    assert_eq!(executed.event, EventKind::TpTriggered);
    assert_eq!(executed.realized_pnl, dec!(99.16));

    let events = s.store.list_events(Some(position.id), 10).await.unwrap();
    assert!(events.iter().any(|e| e.event == EventKind::TpTriggered));

    // Last open position on the symbol is gone, so the feed lets go.
    assert!(s.feed.subscribed_symbols().is_empty());
}

#[tokio::test]
async fn short_position_stops_out() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let mut req = limit_request("ETHUSDT", Side::Short, SizeMode::Qty, dec!(2), dec!(50), 5);
    req.sl = Some(dec!(52));
    req.sl_mode = Some(SlTpMode::Price);
    req.tp = Some(dec!(45));
    req.tp_mode = Some(SlTpMode::Price);

    let position = s.broker.create_position(req).await.unwrap();
    assert_eq!(position.fees_open, dec!(0.04));

    s.engine.on_tick(tick("ETHUSDT", dec!(51))).await;
    assert!(s
        .store
        .get_position(position.id)
        .await
        .unwrap()
        .unwrap()
        .is_open());

    s.engine.on_tick(tick("ETHUSDT", dec!(52))).await;

    let closed = s.store.get_position(position.id).await.unwrap().unwrap();
    assert_eq!(closed.close_price, Some(dec!(52)));
    assert_eq!(closed.fees_close, Some(dec!(0.0416)));
    assert_eq!(closed.realized_pnl, Some(dec!(-4.0816)));

    let events = s.store.list_events(Some(position.id), 10).await.unwrap();
    assert!(events.iter().any(|e| e.event == EventKind::SlTriggered));
}

#[tokio::test]
async fn stop_loss_takes_priority_over_take_profit() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    // Misconfigured levels: at mark 94 both predicates hold.
    let mut req = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 1);
    req.sl = Some(dec!(95));
    req.tp = Some(dec!(94));

    let position = s.broker.create_position(req).await.unwrap();
    s.engine.on_tick(tick("BTCUSDT", dec!(94))).await;

    let events = s.store.list_events(Some(position.id), 10).await.unwrap();
    assert!(events.iter().any(|e| e.event == EventKind::SlTriggered));
    assert!(!events.iter().any(|e| e.event == EventKind::TpTriggered));
}

#[tokio::test]
async fn manual_close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let position = s
        .broker
        .create_position(limit_request(
            "BTCUSDT",
            Side::Long,
            SizeMode::Qty,
            dec!(1),
            dec!(100),
            1,
        ))
        .await
        .unwrap();

    // Seed the price cache the same way the session task does.
    s.feed.ingest(tick("BTCUSDT", dec!(105)));

    let closed = s.broker.close_position_manual(position.id).await.unwrap();
    assert_eq!(closed.close_price, Some(dec!(105)));
    // (105 - 100) * 1 - 0.04 - 0.042
    assert_eq!(closed.realized_pnl, Some(dec!(4.918)));

    let err = s.broker.close_position_manual(position.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let fills = s.store.list_fills(position.id).await.unwrap();
    assert_eq!(
        fills.iter().filter(|f| f.fill_type == FillType::Close).count(),
        1
    );

    let events = s.store.list_events(Some(position.id), 10).await.unwrap();
    assert_eq!(
        events.iter().filter(|e| e.event == EventKind::ManualClose).count(),
        1
    );
}

#[tokio::test]
async fn repeated_trigger_ticks_close_once() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let mut req = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 1);
    req.sl = Some(dec!(95));
    let position = s.broker.create_position(req).await.unwrap();

    let mut triggers = s.engine.subscribe_triggers();

    s.engine.on_tick(tick("BTCUSDT", dec!(94))).await;
    s.engine.on_tick(tick("BTCUSDT", dec!(93))).await;

    assert!(triggers.try_recv().is_ok());
    assert!(triggers.try_recv().is_err());

    let fills = s.store.list_fills(position.id).await.unwrap();
    assert_eq!(
        fills.iter().filter(|f| f.fill_type == FillType::Close).count(),
        1
    );
}

#[tokio::test]
async fn restart_recovers_open_positions_and_subscriptions() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("flow.db");

    let original_sl;
    {
        let s = stack(&dir).await;
        let mut btc = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 1);
        btc.sl = Some(dec!(92));
        let created = s.broker.create_position(btc).await.unwrap();
        s.broker
            .update_sl_tp(
                created.id,
                UpdateSlTpRequest {
                    sl: Some(dec!(93)),
                    tp: None,
                },
            )
            .await
            .unwrap();
        original_sl = dec!(93);

        let eth = limit_request("ETHUSDT", Side::Short, SizeMode::Qty, dec!(2), dec!(50), 2);
        s.broker.create_position(eth).await.unwrap();
    }

    // New process: fresh store over the same file, fresh feed.
    let store = Arc::new(Store::new(db_path.to_str().unwrap()).await.unwrap());
    let feed = PriceFeed::new("wss://example.invalid/ws");
    let open = store.list_positions(Some(PositionStatus::Open)).await.unwrap();
    assert_eq!(open.len(), 2);
    let btc = open.iter().find(|p| p.symbol == "BTCUSDT").unwrap();
    assert_eq!(btc.sl, Some(original_sl));

    for symbol in store.open_symbols().await.unwrap() {
        feed.subscribe(&symbol);
    }
    let mut symbols = feed.subscribed_symbols();
    symbols.sort();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
}

#[tokio::test]
async fn delete_removes_audit_trail() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let position = s
        .broker
        .create_position(limit_request(
            "BTCUSDT",
            Side::Long,
            SizeMode::Qty,
            dec!(1),
            dec!(100),
            1,
        ))
        .await
        .unwrap();

    s.broker.delete_position(position.id).await.unwrap();
    assert!(s.store.get_position(position.id).await.unwrap().is_none());
    assert!(s.store.list_fills(position.id).await.unwrap().is_empty());
    assert!(s
        .store
        .list_events(Some(position.id), 10)
        .await
        .unwrap()
        .is_empty());

    let err = s.broker.delete_position(position.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn stats_aggregate_closed_positions() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let mut btc = limit_request("BTCUSDT", Side::Long, SizeMode::Usdt, dec!(1000), dec!(100), 1);
    btc.sl = Some(dec!(95));
    btc.tp = Some(dec!(110));
    s.broker.create_position(btc).await.unwrap();

    let mut eth = limit_request("ETHUSDT", Side::Short, SizeMode::Qty, dec!(2), dec!(50), 5);
    eth.sl = Some(dec!(52));
    s.broker.create_position(eth).await.unwrap();

    let sol = limit_request("SOLUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(10), 1);
    s.broker.create_position(sol).await.unwrap();

    s.engine.on_tick(tick("BTCUSDT", dec!(110))).await;
    s.engine.on_tick(tick("ETHUSDT", dec!(52))).await;

    let stats = s.broker.get_stats().await.unwrap();
    assert_eq!(stats.total_positions, 3);
    assert_eq!(stats.open_positions, 1);
    assert_eq!(stats.closed_positions, 2);
    assert_eq!(stats.total_pnl, dec!(95.0784));
    assert!((stats.win_rate - 50.0).abs() < 1e-9);
    // (99.16/10)/5 = 1.9832 and (-4.0816/2)/2 = -1.0204 average to 0.4814
    let avg_r = stats.avg_r_multiple.unwrap();
    assert!((avg_r - 0.4814).abs() < 1e-9);
    assert_eq!(stats.best_symbol.unwrap().symbol, "BTCUSDT");
    assert_eq!(stats.worst_symbol.unwrap().symbol, "ETHUSDT");
    assert_eq!(stats.current_balance, dec!(10095.0784));
}

#[tokio::test]
async fn csv_export_quotes_and_orders_rows() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let mut btc = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 1);
    btc.tp = Some(dec!(110));
    btc.notes = Some("scalp, quick \"test\" entry".to_string());
    let first = s.broker.create_position(btc).await.unwrap();
    s.engine.on_tick(tick("BTCUSDT", dec!(110))).await;

    let eth = limit_request("ETHUSDT", Side::Short, SizeMode::Qty, dec!(2), dec!(50), 2);
    s.broker.create_position(eth).await.unwrap();

    let csv = s.broker.export_csv(None, None, None).await.unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("ID,Symbol,Side,Quantity,Entry Price,Close Price,Entry Time"));
    assert!(lines[1].starts_with(&format!("{},BTCUSDT,LONG,1,100,110,", first.id)));
    assert!(lines[1].contains("\"scalp, quick \"\"test\"\" entry\""));
    // The open ETH row has empty close-side cells.
    assert!(lines[2].contains(",ETHUSDT,SHORT,2,50,,"));

    let filtered = s
        .broker
        .export_csv(None, None, Some("BTCUSDT".to_string()))
        .await
        .unwrap();
    assert_eq!(filtered.lines().count(), 2);
}

#[tokio::test]
async fn settings_round_trip() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    let defaults = s.broker.get_settings().await.unwrap();
    assert_eq!(defaults.taker_fee, dec!(0.0004));

    let updated = s
        .broker
        .update_settings(SettingsUpdate {
            taker_fee: Some(dec!(0.0005)),
            base_balance: Some(dec!(25000)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.taker_fee, dec!(0.0005));
    assert_eq!(updated.base_balance, dec!(25000));
    // Untouched fields survive a partial update.
    assert_eq!(updated.maker_fee, dec!(0.0002));

    let reread = s.broker.get_settings().await.unwrap();
    assert_eq!(reread.taker_fee, dec!(0.0005));
}

#[tokio::test]
async fn settings_defaults_fill_missing_sl_tp() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    s.broker
        .update_settings(SettingsUpdate {
            default_stop_loss_percent: Some(dec!(5)),
            default_take_profit_percent: Some(dec!(10)),
            ..Default::default()
        })
        .await
        .unwrap();

    // No levels on the request: the default percents convert at entry.
    let position = s
        .broker
        .create_position(limit_request(
            "BTCUSDT",
            Side::Long,
            SizeMode::Usdt,
            dec!(1000),
            dec!(100),
            1,
        ))
        .await
        .unwrap();
    assert_eq!(position.sl, Some(dec!(95.00)));
    assert_eq!(position.tp, Some(dec!(110.00)));

    // An explicit level wins over its default; the other still falls back.
    let mut req = limit_request("ETHUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(200), 1);
    req.sl = Some(dec!(150));
    let explicit = s.broker.create_position(req).await.unwrap();
    assert_eq!(explicit.sl, Some(dec!(150)));
    assert_eq!(explicit.tp, Some(dec!(220.00)));

    // A non-positive default is rejected before it can take effect.
    let err = s
        .broker
        .update_settings(SettingsUpdate {
            default_stop_loss_percent: Some(dec!(0)),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn create_position_validation() {
    let dir = TempDir::new().unwrap();
    let s = stack(&dir).await;

    // Wrong quote asset.
    let req = limit_request("BTCBUSD", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 1);
    assert!(matches!(
        s.broker.create_position(req).await.unwrap_err(),
        AppError::Validation(_)
    ));

    // Leverage out of range.
    let req = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 126);
    assert!(matches!(
        s.broker.create_position(req).await.unwrap_err(),
        AppError::Validation(_)
    ));

    // LIMIT without a limit price.
    let mut req = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(1), dec!(100), 1);
    req.limit_price = None;
    assert!(matches!(
        s.broker.create_position(req).await.unwrap_err(),
        AppError::Validation(_)
    ));

    // Non-positive size.
    let req = limit_request("BTCUSDT", Side::Long, SizeMode::Qty, dec!(0), dec!(100), 1);
    assert!(matches!(
        s.broker.create_position(req).await.unwrap_err(),
        AppError::Validation(_)
    ));

    // Nothing persisted by any of the rejected requests.
    assert!(s.store.list_positions(None).await.unwrap().is_empty());
}
