//! 실행 컨트롤러 통합 테스트 (시뮬레이션 거래소 + 임시 원장).

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use trader_core::{Order, OrderStatusType, Price, Quantity, RecordKind, Side};
use trader_exchange::{
    ExchangeAdapter, ExchangeError, ExchangeResult, SimulatedConfig, SimulatedExchange,
};
use trader_execution::{
    EngineConfig, EntryRequest, EntryStyle, ExecutionController, ExecutionStatus, ExitPolicy,
    Ledger, StakeSize, StrategyProfile,
};
use trader_risk::{Confidence, DenialReason, FlowTrade, VpinAction, VpinConfig};

const SYMBOL: &str = "YES-1";

struct Harness {
    _dir: TempDir,
    exchange: Arc<SimulatedExchange>,
    controller: ExecutionController,
}

fn base_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.ledger_path = dir.path().join("trades.jsonl");
    config.execution.retry_delay_ms = 1;
    config.vpin = VpinConfig::default().with_buckets(100.0, 50);
    config
}

async fn harness_with(configure: impl FnOnce(&mut EngineConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    configure(&mut config);

    let exchange = Arc::new(SimulatedExchange::new(
        SimulatedConfig::default().with_slippage_rate(config.simulated.slippage_rate),
    ));
    exchange.set_price(SYMBOL, dec!(0.50)).await;

    let ledger = Ledger::open(config.ledger_path.clone()).unwrap();
    let mut controller = ExecutionController::new(exchange.clone(), ledger, &config);
    // 균형 잡힌 흐름으로 VPIN 0
    controller.observe_flow(FlowTrade::new(50.0, Side::Buy));
    controller.observe_flow(FlowTrade::new(50.0, Side::Sell));

    Harness {
        _dir: dir,
        exchange,
        controller,
    }
}

async fn harness() -> Harness {
    harness_with(|config| config.simulated.slippage_rate = Decimal::ZERO).await
}

/// 취소 요청을 지정한 횟수만큼 네트워크 에러로 실패시키는 어댑터.
struct FlakyCancel {
    inner: Arc<SimulatedExchange>,
    cancel_failures: AtomicU32,
}

impl FlakyCancel {
    fn fail_cancels(&self, n: u32) {
        self.cancel_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExchangeAdapter for FlakyCancel {
    fn name(&self) -> &str {
        "flaky-cancel"
    }

    async fn place_market_order(&self, symbol: &str, side: Side, quantity: Quantity) -> ExchangeResult<Order> {
        self.inner.place_market_order(symbol, side, quantity).await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> ExchangeResult<Order> {
        self.inner.place_limit_order(symbol, side, quantity, price).await
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<bool> {
        let failing = self
            .cancel_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExchangeError::NetworkError("connection reset".to_string()));
        }
        self.inner.cancel_order(order_id).await
    }

    async fn get_order_status(&self, order_id: &str) -> ExchangeResult<OrderStatusType> {
        self.inner.get_order_status(order_id).await
    }

    async fn get_position_value(&self, symbol: &str, side: Side) -> ExchangeResult<Price> {
        self.inner.get_position_value(symbol, side).await
    }
}

struct FlakyHarness {
    _dir: TempDir,
    exchange: Arc<SimulatedExchange>,
    adapter: Arc<FlakyCancel>,
    controller: ExecutionController,
}

/// 메이커 청산이 0.60에 대기 중인 상태를 만듭니다.
async fn resting_exit_with_flaky_cancel(configure: impl FnOnce(&mut EngineConfig)) -> FlakyHarness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(&dir);
    config.strategy = StrategyProfile::new("maker").with_maker_exit(true);
    configure(&mut config);

    let exchange = Arc::new(SimulatedExchange::new(
        SimulatedConfig::default().with_slippage_rate(Decimal::ZERO),
    ));
    exchange.set_price(SYMBOL, dec!(0.50)).await;
    let adapter = Arc::new(FlakyCancel {
        inner: exchange.clone(),
        cancel_failures: AtomicU32::new(0),
    });

    let ledger = Ledger::open(config.ledger_path.clone()).unwrap();
    let mut controller = ExecutionController::new(adapter.clone(), ledger, &config);
    controller.observe_flow(FlowTrade::new(50.0, Side::Buy));
    controller.observe_flow(FlowTrade::new(50.0, Side::Sell));

    controller.enter_position(buy(dec!(5))).await;
    let pending = controller
        .exit_position(SYMBOL, ExitPolicy::Maker { price: dec!(0.60) }, "take_profit")
        .await;
    assert_eq!(pending.status, ExecutionStatus::Pending);

    FlakyHarness {
        _dir: dir,
        exchange,
        adapter,
        controller,
    }
}

fn buy(stake: Decimal) -> EntryRequest {
    EntryRequest::new(SYMBOL, Side::Buy, StakeSize::Notional(stake), dec!(0.50)).with_reason("signal")
}

#[tokio::test]
async fn test_long_round_trip() {
    let mut h = harness().await;

    let entry = h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(entry.status, ExecutionStatus::Filled, "{}", entry.message);
    assert_eq!(entry.attempts, 1);
    // 0.001 × 0.50 × 10
    assert_eq!(entry.fees, dec!(0.005));

    let position = h.controller.risk().position(SYMBOL).unwrap().clone();
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.entry_price, dec!(0.50));
    assert_eq!(position.strategy, "default");

    h.exchange.set_price(SYMBOL, dec!(0.60)).await;
    let exit = h.controller.exit_position(SYMBOL, ExitPolicy::Immediate, "take_profit").await;
    assert_eq!(exit.status, ExecutionStatus::Filled, "{}", exit.message);
    assert_eq!(exit.fees, dec!(0.006));
    // (0.60 − 0.50) × 10 − (0.005 + 0.006)
    assert_eq!(exit.pnl, Some(dec!(0.989)));

    let status = h.controller.risk().get_status();
    assert_eq!(status.daily_pnl, dec!(0.989));
    assert_eq!(status.balance, dec!(10000.989));
    assert_eq!(status.consecutive_losses, 0);
    assert_eq!(status.open_positions, 0);

    let records = h.controller.ledger().read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, RecordKind::Entry);
    assert_eq!(records[0].pnl, None);
    assert!(records[0].dry_run);
    assert_eq!(records[1].kind, RecordKind::Exit);
    assert_eq!(records[1].side, Side::Sell);
    assert_eq!(records[1].reason, "take_profit");
    assert_eq!(records[1].pnl, Some(dec!(0.989)));
}

#[tokio::test]
async fn test_win_resets_loss_streak() {
    let mut h = harness().await;

    h.controller.enter_position(buy(dec!(5))).await;
    h.exchange.set_price(SYMBOL, dec!(0.40)).await;
    let loss = h.controller.exit_position(SYMBOL, ExitPolicy::Immediate, "stop").await;
    assert!(loss.pnl.unwrap() < Decimal::ZERO);
    assert_eq!(h.controller.risk().state().consecutive_losses, 1);

    h.exchange.set_price(SYMBOL, dec!(0.50)).await;
    h.controller.enter_position(buy(dec!(5))).await;
    h.exchange.set_price(SYMBOL, dec!(0.60)).await;
    let win = h.controller.exit_position(SYMBOL, ExitPolicy::Immediate, "target").await;
    assert!(win.pnl.unwrap() > Decimal::ZERO);
    assert_eq!(h.controller.risk().state().consecutive_losses, 0);
}

#[tokio::test]
async fn test_ledger_pnl_matches_daily_pnl() {
    let mut h = harness().await;

    for exit_price in [dec!(0.55), dec!(0.47), dec!(0.52)] {
        h.exchange.set_price(SYMBOL, dec!(0.50)).await;
        let entry = h.controller.enter_position(buy(dec!(4))).await;
        assert!(entry.success, "{}", entry.message);
        h.exchange.set_price(SYMBOL, exit_price).await;
        let exit = h.controller.exit_position(SYMBOL, ExitPolicy::Immediate, "rotate").await;
        assert!(exit.success, "{}", exit.message);
    }

    let ledger_pnl: Decimal = h
        .controller
        .ledger()
        .read_all()
        .unwrap()
        .iter()
        .filter_map(|r| r.pnl)
        .sum();
    assert_eq!(ledger_pnl, h.controller.risk().state().daily_pnl);
    assert_eq!(h.controller.ledger().today_pnl().unwrap(), ledger_pnl);

    let summary = h.controller.ledger().summary().unwrap();
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.exits, 3);
    assert_eq!(summary.wins, 2);
}

#[tokio::test]
async fn test_retry_until_accepted() {
    let mut h = harness().await;
    h.exchange.fail_next(2);

    let result = h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(result.status, ExecutionStatus::Filled, "{}", result.message);
    assert_eq!(result.attempts, 3);
    assert!(h.controller.risk().has_position(SYMBOL));
}

#[tokio::test]
async fn test_exhausted_retries_leave_state_untouched() {
    let mut h = harness().await;
    h.exchange.fail_next(3);

    let result = h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert!(result.message.contains("simulated failure"));

    assert!(!h.controller.risk().has_position(SYMBOL));
    assert_eq!(h.controller.risk().state().trades_today, 0);
    assert!(h.controller.ledger().read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_entry_on_symbol_is_denied() {
    let mut h = harness().await;
    h.controller.enter_position(buy(dec!(5))).await;

    let result = h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(result.status, ExecutionStatus::Denied);
    assert!(matches!(result.denial, Some(DenialReason::AlreadyInPosition { .. })));
    assert_eq!(h.controller.risk().state().trades_today, 1);
}

#[tokio::test]
async fn test_oversized_stake_is_denied() {
    let mut h = harness().await;

    let result = h.controller.enter_position(buy(dec!(25))).await;
    assert_eq!(result.status, ExecutionStatus::Denied);
    assert_eq!(result.message, "Position size 25 > max 10");
    assert_eq!(h.exchange.open_order_count().await, 0);
}

#[tokio::test]
async fn test_maker_exit_settles_on_fill() {
    let mut h = harness_with(|config| {
        config.simulated.slippage_rate = Decimal::ZERO;
        config.strategy = StrategyProfile::new("maker").with_maker_exit(true);
    })
    .await;

    h.controller.enter_position(buy(dec!(5))).await;
    let pending = h
        .controller
        .exit_position(SYMBOL, ExitPolicy::Maker { price: dec!(0.60) }, "take_profit")
        .await;
    assert_eq!(pending.status, ExecutionStatus::Pending);
    assert!(pending.success);
    assert!(h.controller.orders().has_resting_exit(SYMBOL));
    // 대기 중에는 포지션 유지
    assert!(h.controller.risk().has_position(SYMBOL));

    let again = h
        .controller
        .exit_position(SYMBOL, ExitPolicy::Maker { price: dec!(0.61) }, "take_profit")
        .await;
    assert!(matches!(again.denial, Some(DenialReason::OrderPending { .. })));

    // 가격이 지정가에 닿지 않으면 계속 대기
    assert!(h.controller.check_fill().await.is_empty());

    h.exchange.set_price(SYMBOL, dec!(0.61)).await;
    let fills = h.controller.check_fill().await;
    assert_eq!(fills.len(), 1);
    let fill = &fills[0];
    assert_eq!(fill.status, ExecutionStatus::Filled);
    // 메이커 리베이트: −0.0002 × 0.60 × 10
    assert_eq!(fill.fees, dec!(-0.0012));
    // 1.0 − (0.005 − 0.0012)
    assert_eq!(fill.pnl, Some(dec!(0.9962)));

    assert!(!h.controller.risk().has_position(SYMBOL));
    assert!(h.controller.orders().is_empty());
    assert_eq!(h.controller.risk().state().daily_pnl, dec!(0.9962));
}

#[tokio::test]
async fn test_maker_exit_falls_back_without_support() {
    let mut h = harness().await;
    h.controller.enter_position(buy(dec!(5))).await;

    let result = h
        .controller
        .exit_position(SYMBOL, ExitPolicy::Maker { price: dec!(0.60) }, "take_profit")
        .await;
    assert_eq!(result.status, ExecutionStatus::Filled);
    // 0.50 시장가 청산: 0 − (0.005 + 0.005)
    assert_eq!(result.pnl, Some(dec!(-0.010)));
    assert!(h.controller.orders().is_empty());
}

#[tokio::test]
async fn test_passive_entry_opens_on_fill() {
    let mut h = harness().await;

    let pending = h
        .controller
        .enter_position(buy(dec!(5)).with_limit_price(dec!(0.49)).with_stop(dec!(0.40)))
        .await;
    assert_eq!(pending.status, ExecutionStatus::Pending);
    assert!(h.controller.orders().has_resting_entry(SYMBOL));
    assert!(!h.controller.risk().has_position(SYMBOL));

    let blocked = h.controller.enter_position(buy(dec!(5))).await;
    assert!(matches!(blocked.denial, Some(DenialReason::OrderPending { .. })));

    h.exchange.set_price(SYMBOL, dec!(0.48)).await;
    let fills = h.controller.check_fill().await;
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].status, ExecutionStatus::Filled);

    let position = h.controller.risk().position(SYMBOL).unwrap();
    assert_eq!(position.entry_price, dec!(0.49));
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.stop_price, Some(dec!(0.40)));
    assert_eq!(position.entry_fee, dec!(-0.00098));
    assert_eq!(h.controller.ledger().read_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_passive_entry_style_rests_at_reference() {
    let mut h = harness_with(|config| {
        config.simulated.slippage_rate = Decimal::ZERO;
        config.strategy = StrategyProfile::new("quoter").with_entry_style(EntryStyle::Passive);
    })
    .await;

    let request = EntryRequest::new(SYMBOL, Side::Buy, StakeSize::Notional(dec!(5)), dec!(0.45));
    let result = h.controller.enter_position(request).await;
    assert_eq!(result.status, ExecutionStatus::Pending);
    assert_eq!(result.order.unwrap().limit_price, Some(dec!(0.45)));
}

#[tokio::test]
async fn test_cancel_pending_orders() {
    let mut h = harness_with(|config| {
        config.simulated.slippage_rate = Decimal::ZERO;
        config.strategy = StrategyProfile::new("maker").with_maker_exit(true);
    })
    .await;
    h.exchange.set_price("NO-2", dec!(0.30)).await;

    // 패시브 진입 대기
    h.controller
        .enter_position(buy(dec!(5)).with_limit_price(dec!(0.45)))
        .await;
    // 다른 심볼에서 메이커 청산 대기
    let other = EntryRequest::new("NO-2", Side::Buy, StakeSize::Notional(dec!(3)), dec!(0.30));
    h.controller.enter_position(other).await;
    h.controller
        .exit_position("NO-2", ExitPolicy::Maker { price: dec!(0.40) }, "take_profit")
        .await;
    assert_eq!(h.controller.orders().len(), 2);

    let results = h.controller.cancel_pending_exits().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == ExecutionStatus::Cancelled));
    assert!(h.controller.orders().is_empty());
    assert_eq!(h.exchange.open_order_count().await, 0);

    // 청산이 취소되었으므로 포지션은 그대로
    assert!(h.controller.risk().has_position("NO-2"));
    assert!(!h.controller.risk().has_position(SYMBOL));
}

#[tokio::test]
async fn test_failed_cancel_keeps_order_tracked() {
    let mut h = resting_exit_with_flaky_cancel(|_| {}).await;
    h.adapter.fail_cancels(1);

    let results = h.controller.cancel_pending_exits().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ExecutionStatus::Failed);
    // 거래소에 살아 있는 주문은 계속 추적
    assert_eq!(h.exchange.open_order_count().await, 1);
    assert!(h.controller.orders().has_resting_exit(SYMBOL));

    // 나중에 체결되면 정상적으로 청산 처리
    h.exchange.set_price(SYMBOL, dec!(0.60)).await;
    let fills = h.controller.check_fill().await;
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].status, ExecutionStatus::Filled);
    assert_eq!(fills[0].pnl, Some(dec!(0.9962)));
    assert!(!h.controller.risk().has_position(SYMBOL));
    assert!(h.controller.orders().is_empty());
}

#[tokio::test]
async fn test_cancel_retry_after_failure() {
    let mut h = resting_exit_with_flaky_cancel(|_| {}).await;
    h.adapter.fail_cancels(1);

    h.controller.cancel_pending_exits().await;
    let results = h.controller.cancel_pending_exits().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ExecutionStatus::Cancelled);
    assert!(h.controller.orders().is_empty());
    assert_eq!(h.exchange.open_order_count().await, 0);
    assert!(h.controller.risk().has_position(SYMBOL));
}

#[tokio::test]
async fn test_stop_loss_deferred_when_cancel_fails() {
    let mut h =
        resting_exit_with_flaky_cancel(|config| config.risk.default_stop_loss_pct = Some(0.10)).await;
    h.adapter.fail_cancels(1);
    h.exchange.set_price(SYMBOL, dec!(0.44)).await;

    let result = h.controller.check_stop_loss(SYMBOL, dec!(0.44)).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.message.starts_with("Stop-loss deferred"), "{}", result.message);
    // 시장가 청산을 보내지 않음
    assert!(h.controller.risk().has_position(SYMBOL));
    assert!(h.controller.orders().has_resting_exit(SYMBOL));
    assert_eq!(h.controller.ledger().read_all().unwrap().len(), 1);

    let result = h.controller.check_stop_loss(SYMBOL, dec!(0.44)).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Filled, "{}", result.message);
    assert!(!h.controller.risk().has_position(SYMBOL));
    assert!(h.controller.orders().is_empty());
    assert_eq!(h.exchange.open_order_count().await, 0);

    let records = h.controller.ledger().read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].reason, "stop_loss");
}

#[tokio::test]
async fn test_stop_loss_exits_position() {
    let mut h = harness_with(|config| {
        config.simulated.slippage_rate = Decimal::ZERO;
        config.risk.default_stop_loss_pct = Some(0.10);
    })
    .await;

    h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(
        h.controller.risk().position(SYMBOL).unwrap().stop_price,
        Some(dec!(0.45))
    );

    assert!(h.controller.check_stop_loss(SYMBOL, dec!(0.46)).await.is_none());

    h.exchange.set_price(SYMBOL, dec!(0.44)).await;
    let result = h.controller.check_stop_loss(SYMBOL, dec!(0.44)).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Filled);
    assert!(result.pnl.unwrap() < Decimal::ZERO);

    let records = h.controller.ledger().read_all().unwrap();
    assert_eq!(records.last().unwrap().reason, "stop_loss");
}

#[tokio::test]
async fn test_fill_rejected_after_slippage_is_flattened() {
    let mut h = harness_with(|config| {
        config.simulated.slippage_rate = dec!(0.1);
        config.risk.max_position_size = dec!(5.2);
    })
    .await;

    // 사전 검사는 5로 통과, 체결 명목 0.55 × 10 = 5.5는 한도 초과
    let result = h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(matches!(result.denial, Some(DenialReason::PositionTooLarge { .. })));
    assert!(!h.controller.risk().has_position(SYMBOL));
    // 0.55에 사서 0.45에 되팜: −1.0 − (0.0055 + 0.0045)
    assert_eq!(result.pnl, Some(dec!(-1.01)));
    assert_eq!(result.fees, dec!(0.01));

    let status = h.controller.risk().get_status();
    assert_eq!(status.daily_pnl, dec!(-1.01));
    assert_eq!(status.balance, dec!(9998.99));
    assert_eq!(status.consecutive_losses, 1);
    assert_eq!(status.total_trades, 1);
    assert_eq!(status.open_positions, 0);

    let records = h.controller.ledger().read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, RecordKind::Entry);
    assert_eq!(records[0].price, dec!(0.55));
    assert_eq!(records[1].kind, RecordKind::Exit);
    assert_eq!(records[1].side, Side::Sell);
    assert_eq!(records[1].price, dec!(0.45));
    assert_eq!(records[1].reason, "unwind");
    let ledger_pnl: Decimal = records.iter().filter_map(|r| r.pnl).sum();
    assert_eq!(ledger_pnl, status.daily_pnl);
}

#[tokio::test]
async fn test_kill_switch_denies_entry() {
    let mut h = harness().await;
    for _ in 0..3 {
        h.controller.observe_flow(FlowTrade::new(100.0, Side::Sell));
    }

    let permission = h.controller.check_trade_permission();
    assert_eq!(permission.action, VpinAction::Kill);

    let result = h.controller.enter_position(buy(dec!(5))).await;
    assert_eq!(result.status, ExecutionStatus::Denied);
    assert!(matches!(result.denial, Some(DenialReason::ToxicityKill { .. })));
    assert_eq!(h.exchange.open_order_count().await, 0);
}

#[tokio::test]
async fn test_no_flow_data_withdraws() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(&dir);
    let exchange = Arc::new(SimulatedExchange::default());
    exchange.set_price(SYMBOL, dec!(0.50)).await;

    let mut controller = ExecutionController::from_config(&config, exchange).unwrap();
    let result = controller.enter_position(buy(dec!(5))).await;
    assert_eq!(result.status, ExecutionStatus::Denied);
    assert!(matches!(result.denial, Some(DenialReason::ToxicityWithdraw { .. })));
}

#[tokio::test]
async fn test_kelly_sized_entry() {
    let mut h = harness_with(|config| {
        config.simulated.slippage_rate = Decimal::ZERO;
        config.risk.max_position_size = dec!(100);
    })
    .await;
    h.exchange.set_price(SYMBOL, dec!(0.55)).await;

    let request = EntryRequest::new(
        SYMBOL,
        Side::Buy,
        StakeSize::Kelly {
            model_probability: 0.75,
            market_probability: 0.55,
            target: None,
            stop: None,
        },
        dec!(0.55),
    );
    let result = h.controller.enter_position(request).await;
    assert_eq!(result.status, ExecutionStatus::Filled, "{}", result.message);

    let sizing = result.sizing.unwrap();
    assert_eq!(sizing.confidence, Confidence::High);
    assert_eq!(sizing.position_size, dec!(50));
    // 50 / 0.55, 소수점 4자리 내림
    assert_eq!(h.controller.risk().position(SYMBOL).unwrap().quantity, dec!(90.9090));

    h.exchange.set_price(SYMBOL, dec!(0.60)).await;
    h.controller.exit_position(SYMBOL, ExitPolicy::Immediate, "target").await;

    let stats = h.controller.sizer().performance_stats().unwrap();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.wins, 1);
    assert_eq!(h.controller.sizer().bankroll(), h.controller.risk().balance());
}

#[tokio::test]
async fn test_kelly_without_edge_is_denied() {
    let mut h = harness().await;
    let request = EntryRequest::new(
        SYMBOL,
        Side::Buy,
        StakeSize::Kelly {
            model_probability: 0.50,
            market_probability: 0.50,
            target: None,
            stop: None,
        },
        dec!(0.50),
    );

    let result = h.controller.enter_position(request).await;
    assert_eq!(result.status, ExecutionStatus::Denied);
    assert!(matches!(result.denial, Some(DenialReason::NoEdge { .. })));
    assert_eq!(result.sizing.unwrap().position_size, Decimal::ZERO);
}

#[tokio::test]
async fn test_exit_without_position_fails() {
    let mut h = harness().await;
    let result = h.controller.exit_position(SYMBOL, ExitPolicy::Immediate, "manual").await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.message, "No open position: YES-1");

    let status = h.controller.risk().get_status();
    assert_eq!(status.balance, dec!(10000));
    assert_eq!(status.total_trades, 0);
    assert!(h.controller.ledger().read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_snapshot() {
    let mut h = harness().await;
    h.controller.enter_position(buy(dec!(5))).await;

    let status = h.controller.get_status();
    assert_eq!(status.strategy, "default");
    assert!(status.dry_run);
    assert_eq!(status.risk.open_positions, 1);
    assert!(status.toxicity.permitted);
    assert_eq!(status.resting_orders, 0);
}
