//! 실행 컨트롤러 구현.
//!
//! 제공 기능:
//! - VPIN 게이트, 사이징, 리스크 사전 검사를 거친 포지션 진입
//! - 고정 횟수/고정 간격 재시도를 포함한 주문 제출
//! - 시장가 즉시 청산과 메이커(지정가) 청산
//! - 대기 주문 체결 폴링과 일괄 취소
//! - 진입/청산 원장 기록
//!
//! 리스크 엔진 상태는 컨트롤러가 직접 소유하며, 모든 호출은 [`ExecutionResult`]를
//! 반환합니다.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use trader_core::{
    Amount, DecimalExt, Order, OrderStatusType, Position, Price, Quantity, Side, TradeRecord,
    TraderResult,
};
use trader_exchange::ExchangeAdapter;
use trader_risk::{
    DenialReason, FlowTrade, KellyPositionSizer, KellySizing, RiskEngine, RiskStatus,
    RiskValidation, ToxicityGate, TradePermission, VpinAction, VpinDetector,
};

use crate::config::{EngineConfig, EntryStyle, ExecutionConfig, StrategyProfile};
use crate::ledger::Ledger;
use crate::order_manager::{OrderManager, OrderPurpose, PendingEntry, RestingOrder};

// ==================== Requests ====================

/// 진입 크기 지정 방식.
#[derive(Debug, Clone, PartialEq)]
pub enum StakeSize {
    /// 고정 투자 금액
    Notional(Amount),
    /// 분수 Kelly 사이징
    Kelly {
        model_probability: f64,
        market_probability: f64,
        target: Option<f64>,
        stop: Option<f64>,
    },
}

/// 진입 요청.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRequest {
    pub symbol: String,
    pub side: Side,
    pub size: StakeSize,
    /// 수량 환산과 Kelly 가격에 쓰는 기준 가격
    pub reference_price: Price,
    /// 지정하면 이 가격의 지정가(패시브) 진입
    pub limit_price: Option<Price>,
    pub stop_price: Option<Price>,
    pub reason: String,
    pub leader: Option<String>,
}

impl EntryRequest {
    /// 새 진입 요청.
    pub fn new(symbol: impl Into<String>, side: Side, size: StakeSize, reference_price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            reference_price,
            limit_price: None,
            stop_price: None,
            reason: String::new(),
            leader: None,
        }
    }

    /// 지정가 진입.
    pub fn with_limit_price(mut self, price: Price) -> Self {
        self.limit_price = Some(price);
        self
    }

    /// 손절 가격.
    pub fn with_stop(mut self, stop_price: Price) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    /// 진입 사유.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// 카피 트레이딩 리더.
    pub fn with_leader(mut self, leader: impl Into<String>) -> Self {
        self.leader = Some(leader.into());
        self
    }
}

/// 청산 방식.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitPolicy {
    /// 시장가 즉시 청산
    Immediate,
    /// 지정가로 대기 (전략이 메이커 청산을 지원할 때만)
    Maker { price: Price },
}

// ==================== Results ====================

/// 실행 결과 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// 체결되어 상태에 반영됨
    Filled,
    /// 지정가 주문이 대기 중
    Pending,
    /// 리스크/독성 거부
    Denied,
    /// 주문 실패 (재시도 소진 등)
    Failed,
    /// 대기 주문 취소됨
    Cancelled,
}

/// 실행 결과.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// 체결 또는 대기 중이면 true
    pub success: bool,
    pub symbol: String,
    pub order: Option<Order>,
    /// 청산 손익 (청산 체결 시)
    pub pnl: Option<Amount>,
    /// 이번 체결의 수수료
    pub fees: Amount,
    pub message: String,
    pub denial: Option<DenialReason>,
    pub sizing: Option<KellySizing>,
    /// 주문 제출 시도 횟수
    pub attempts: u32,
}

impl ExecutionResult {
    fn new(status: ExecutionStatus, symbol: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            success: matches!(status, ExecutionStatus::Filled | ExecutionStatus::Pending),
            symbol: symbol.to_string(),
            order: None,
            pnl: None,
            fees: Decimal::ZERO,
            message: message.into(),
            denial: None,
            sizing: None,
            attempts: 0,
        }
    }

    /// 체결 결과 생성.
    pub fn filled(symbol: &str, order: Order, fees: Amount, message: impl Into<String>) -> Self {
        Self {
            order: Some(order),
            fees,
            ..Self::new(ExecutionStatus::Filled, symbol, message)
        }
    }

    /// 대기 결과 생성.
    pub fn pending(symbol: &str, order: Order, message: impl Into<String>) -> Self {
        Self {
            order: Some(order),
            ..Self::new(ExecutionStatus::Pending, symbol, message)
        }
    }

    /// 거부 결과 생성.
    pub fn denied(symbol: &str, reason: DenialReason) -> Self {
        Self {
            denial: Some(reason.clone()),
            ..Self::new(ExecutionStatus::Denied, symbol, reason.to_string())
        }
    }

    /// 실패 결과 생성.
    pub fn failed(symbol: &str, message: impl Into<String>) -> Self {
        Self::new(ExecutionStatus::Failed, symbol, message)
    }

    /// 취소 결과 생성.
    pub fn cancelled(symbol: &str, order: Order, message: impl Into<String>) -> Self {
        Self {
            order: Some(order),
            ..Self::new(ExecutionStatus::Cancelled, symbol, message)
        }
    }

    /// 손익 설정.
    pub fn with_pnl(mut self, pnl: Amount) -> Self {
        self.pnl = Some(pnl);
        self
    }

    /// 사이징 결과 설정.
    pub fn with_sizing(mut self, sizing: Option<KellySizing>) -> Self {
        self.sizing = sizing;
        self
    }

    /// 시도 횟수 설정.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    fn with_note(mut self, note: Option<String>) -> Self {
        if let Some(note) = note {
            self.message = format!("{} ({})", self.message, note);
        }
        self
    }
}

/// 컨트롤러 상태 요약.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub strategy: String,
    pub dry_run: bool,
    pub risk: RiskStatus,
    pub toxicity: TradePermission,
    pub resting_orders: usize,
}

// ==================== Controller ====================

/// 주문 제출 성공.
struct Submitted {
    order: Order,
    attempts: u32,
}

/// 재시도 소진.
struct SubmitFailure {
    attempts: u32,
    last_error: String,
}

/// 체결된 진입을 포지션으로 만들기 위한 정보.
struct EntryFill {
    side: Side,
    price: Price,
    quantity: Quantity,
    fee: Amount,
    stop_price: Option<Price>,
    leader: Option<String>,
    sizing: Option<KellySizing>,
    reason: String,
}

/// 실행 컨트롤러.
///
/// 사이징, 리스크 검사, 주문 제출, 포지션/원장 반영을 한 곳에서 수행합니다.
pub struct ExecutionController {
    execution: ExecutionConfig,
    strategy: StrategyProfile,
    exchange: Arc<dyn ExchangeAdapter>,
    risk: RiskEngine,
    sizer: KellyPositionSizer,
    toxicity: Box<dyn ToxicityGate>,
    ledger: Ledger,
    orders: OrderManager,
    /// 심볼 → 진입 시 Kelly 사이징 (청산 후 성과 기록용)
    entry_sizing: HashMap<String, KellySizing>,
}

impl ExecutionController {
    /// 설정으로 컨트롤러 생성. 독성 게이트는 자체 [`VpinDetector`]입니다.
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, ledger: Ledger, config: &EngineConfig) -> Self {
        info!(
            exchange = exchange.name(),
            strategy = %config.strategy.tag,
            dry_run = config.execution.dry_run,
            ledger = %ledger.path().display(),
            "실행 컨트롤러 초기화"
        );
        Self {
            execution: config.execution.clone(),
            strategy: config.strategy.clone(),
            exchange,
            risk: RiskEngine::new(config.risk.clone()),
            sizer: KellyPositionSizer::new(config.kelly.clone()),
            toxicity: Box::new(VpinDetector::new(config.vpin.clone())),
            ledger,
            orders: OrderManager::new(),
            entry_sizing: HashMap::new(),
        }
    }

    /// 설정을 검증하고 원장을 열어 컨트롤러 생성.
    pub fn from_config(config: &EngineConfig, exchange: Arc<dyn ExchangeAdapter>) -> TraderResult<Self> {
        config.validate()?;
        let ledger = Ledger::open(config.ledger_path.clone())?;
        Ok(Self::new(exchange, ledger, config))
    }

    /// 독성 게이트 교체 (예: 백그라운드 모니터 핸들).
    pub fn with_toxicity_gate(mut self, gate: Box<dyn ToxicityGate>) -> Self {
        self.toxicity = gate;
        self
    }

    // ==================== Accessors ====================

    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    pub fn sizer(&self) -> &KellyPositionSizer {
        &self.sizer
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn strategy(&self) -> &StrategyProfile {
        &self.strategy
    }

    /// 체결 흐름을 독성 게이트에 입력합니다.
    pub fn observe_flow(&mut self, trade: FlowTrade) {
        self.toxicity.observe(trade, Utc::now());
    }

    /// 리스크 엔진 사전 검사.
    pub fn can_trade(&mut self, symbol: &str, proposed_size: Amount) -> RiskValidation {
        self.risk.can_trade(symbol, proposed_size)
    }

    /// 현재 VPIN 기준 진입 허가.
    pub fn check_trade_permission(&mut self) -> TradePermission {
        self.toxicity.permission_at(Utc::now())
    }

    /// 일일 카운터 초기화.
    pub fn reset_daily(&mut self) {
        self.risk.reset_daily();
    }

    /// UTC 날짜가 바뀌었으면 일일 초기화.
    pub fn roll_day_if_needed(&mut self, now: DateTime<Utc>) -> bool {
        self.risk.roll_day_if_needed(now)
    }

    /// 상태 요약.
    pub fn get_status(&mut self) -> ControllerStatus {
        ControllerStatus {
            strategy: self.strategy.tag.clone(),
            dry_run: self.execution.dry_run,
            risk: self.risk.get_status(),
            toxicity: self.toxicity.permission_at(Utc::now()),
            resting_orders: self.orders.len(),
        }
    }

    // ==================== Entry ====================

    /// 포지션 진입.
    ///
    /// 순서: 기존 포지션/대기 주문 확인 → VPIN 게이트 → 사이징 → 리스크 사전 검사 →
    /// 주문 제출(재시도) → 포지션 등록 → 원장 기록.
    pub async fn enter_position(&mut self, request: EntryRequest) -> ExecutionResult {
        let symbol = request.symbol.clone();

        if self.risk.has_position(&symbol) {
            return ExecutionResult::denied(&symbol, DenialReason::AlreadyInPosition { symbol: symbol.clone() });
        }
        if self.orders.for_symbol(&symbol).is_some() {
            return ExecutionResult::denied(&symbol, DenialReason::OrderPending { symbol: symbol.clone() });
        }

        // VPIN gate
        let permission = self.toxicity.permission_at(Utc::now());
        if permission.action == VpinAction::Kill {
            return ExecutionResult::denied(
                &symbol,
                DenialReason::ToxicityKill { vpin: permission.vpin.unwrap_or(0.0) },
            );
        }
        if !permission.permitted && self.execution.deny_on_withdraw {
            return ExecutionResult::denied(
                &symbol,
                DenialReason::ToxicityWithdraw { vpin: permission.vpin.unwrap_or(0.0) },
            );
        }

        if request.reference_price <= Decimal::ZERO {
            return ExecutionResult::failed(&symbol, "Reference price must be positive");
        }

        // Sizing
        let (stake, sizing) = match &request.size {
            StakeSize::Notional(stake) => (*stake, None),
            StakeSize::Kelly {
                model_probability,
                market_probability,
                target,
                stop,
            } => {
                let sizing = self.sizer.calculate_position_size(
                    *model_probability,
                    *market_probability,
                    request.reference_price.to_f64_lossy(),
                    *target,
                    *stop,
                    permission.vpin.unwrap_or(0.0),
                );
                if !sizing.is_tradable() {
                    return ExecutionResult::denied(
                        &symbol,
                        DenialReason::NoEdge { confidence: sizing.confidence.to_string() },
                    )
                    .with_sizing(Some(sizing));
                }
                (sizing.position_size, Some(sizing))
            }
        };

        if stake <= Decimal::ZERO {
            return ExecutionResult::failed(&symbol, "Stake must be positive");
        }

        // Risk pre-check
        let validation = self.risk.can_trade_for(&symbol, stake, request.leader.as_deref());
        if let Some(reason) = validation.reason {
            info!(symbol = %symbol, reason = %reason, "진입 거부");
            return ExecutionResult::denied(&symbol, reason).with_sizing(sizing);
        }

        let quantity = (stake / request.reference_price)
            .round_dp_with_strategy(self.execution.quantity_dp, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return ExecutionResult::failed(&symbol, format!("Stake {} too small for price {}", stake, request.reference_price));
        }

        let passive_price = request.limit_price.or(match self.strategy.entry_style {
            EntryStyle::Passive => Some(request.reference_price),
            EntryStyle::Aggressive => None,
        });

        let submitted = match self
            .submit_with_retry(&symbol, request.side, quantity, passive_price)
            .await
        {
            Ok(submitted) => submitted,
            Err(failure) => {
                warn!(symbol = %symbol, attempts = failure.attempts, error = %failure.last_error, "진입 주문 실패");
                return ExecutionResult::failed(
                    &symbol,
                    format!("Entry failed after {} attempts: {}", failure.attempts, failure.last_error),
                )
                .with_attempts(failure.attempts)
                .with_sizing(sizing);
            }
        };

        let order = submitted.order;
        let attempts = submitted.attempts;

        // 지정가 주문이 아직 체결되지 않았으면 대기
        if !order.is_filled() {
            let price = order.limit_price.unwrap_or(request.reference_price);
            let pending = PendingEntry {
                stop_price: request.stop_price,
                leader: request.leader.clone(),
                sizing: sizing.clone(),
            };
            if let Err(e) = self.orders.track(order.clone(), OrderPurpose::Entry(pending), request.reason.clone()) {
                warn!(symbol = %symbol, error = %e, "대기 진입 추적 실패, 주문 취소");
                let _ = self.exchange.cancel_order(&order.id).await;
                return ExecutionResult::failed(&symbol, e.to_string()).with_attempts(attempts);
            }
            info!(symbol = %symbol, order_id = %order.id, price = %price, quantity = %quantity, "패시브 진입 대기");
            return ExecutionResult::pending(&symbol, order, format!("Passive entry resting @ {}", price))
                .with_attempts(attempts)
                .with_sizing(sizing);
        }

        let Some(fill_price) = order.average_fill_price.or(order.limit_price) else {
            return ExecutionResult::failed(&symbol, "Fill reported without a price").with_attempts(attempts);
        };
        let fee_rate = if passive_price.is_some() {
            self.execution.maker_fee_rate
        } else {
            self.execution.taker_fee_rate
        };
        let fill = EntryFill {
            side: request.side,
            price: fill_price,
            quantity: order.filled_quantity,
            fee: fee_rate * fill_price * order.filled_quantity,
            stop_price: request.stop_price,
            leader: request.leader,
            sizing,
            reason: request.reason,
        };
        self.finish_entry(&symbol, order, fill).await.with_attempts(attempts)
    }

    /// 체결된 진입을 포지션으로 등록하고 원장에 기록합니다.
    ///
    /// 재검사에서 거부되면 체결 수량을 반대 방향으로 즉시 청산합니다.
    async fn finish_entry(&mut self, symbol: &str, order: Order, fill: EntryFill) -> ExecutionResult {
        let stop_price = fill.stop_price.or_else(|| {
            self.risk
                .config()
                .default_stop_loss_pct
                .map(|pct| RiskEngine::compute_stop_price(fill.price, fill.side, pct))
        });

        let mut position = Position::new(symbol, fill.side, fill.price, fill.quantity, self.strategy.tag.clone())
            .with_entry_fee(fill.fee);
        if let Some(stop) = stop_price {
            position = position.with_stop(stop);
        }
        if let Some(leader) = &fill.leader {
            position = position.with_leader(leader.clone());
        }

        let validation = self.risk.open_position(position.clone());
        if let Some(reason) = validation.reason {
            error!(symbol, order_id = %order.id, reason = %reason, "체결 후 포지션 등록 거부, 반대 주문으로 청산");
            return self.unwind_fill(order, position, fill, reason).await;
        }

        let record = TradeRecord::entry(
            symbol,
            fill.side,
            fill.price,
            fill.quantity,
            fill.fee,
            self.strategy.tag.clone(),
            fill.reason,
            order.id.clone(),
        )
        .with_dry_run(self.execution.dry_run);
        let note = self.append_ledger(&record);

        if let Some(sizing) = &fill.sizing {
            self.entry_sizing.insert(symbol.to_string(), sizing.clone());
        }

        info!(
            symbol,
            side = %fill.side,
            price = %fill.price,
            quantity = %fill.quantity,
            fee = %fill.fee,
            order_id = %order.id,
            "포지션 진입"
        );
        ExecutionResult::filled(
            symbol,
            order,
            fill.fee,
            format!("Entered {} {} @ {}", fill.side, fill.quantity, fill.price),
        )
        .with_sizing(fill.sizing)
        .with_note(note)
    }

    /// 리스크 엔진이 거부한 체결을 반대 시장가 주문으로 되돌립니다.
    ///
    /// 왕복 손익은 원장과 리스크 엔진에 모두 반영됩니다. 되돌리지 못한 체결은
    /// 검사 없이 포지션으로 등록해 이후 청산 대상이 되게 합니다.
    async fn unwind_fill(
        &mut self,
        order: Order,
        position: Position,
        fill: EntryFill,
        denial: DenialReason,
    ) -> ExecutionResult {
        let symbol = position.symbol.clone();
        let entry = TradeRecord::entry(
            &symbol,
            fill.side,
            fill.price,
            fill.quantity,
            fill.fee,
            self.strategy.tag.clone(),
            fill.reason,
            order.id.clone(),
        )
        .with_dry_run(self.execution.dry_run);
        let entry_note = self.append_ledger(&entry);

        let unwound = match self
            .submit_with_retry(&symbol, fill.side.opposite(), fill.quantity, None)
            .await
        {
            Ok(submitted) => match submitted.order.average_fill_price {
                Some(price) => Ok((submitted.order, price)),
                None => Err("unwind fill reported without a price".to_string()),
            },
            Err(failure) => Err(failure.last_error),
        };

        let (unwind_order, exit_price) = match unwound {
            Ok(unwound) => unwound,
            Err(e) => {
                let message = format!("Fill rejected by risk engine ({}), unwind failed: {}", denial, e);
                match self.risk.adopt_position(position) {
                    Ok(()) => error!(symbol = %symbol, error = %e, "거부된 체결 청산 실패, 포지션으로 추적"),
                    Err(untracked) => error!(
                        symbol = %symbol,
                        quantity = %untracked.quantity,
                        error = %e,
                        "거부된 체결 청산 실패, 수동 확인 필요"
                    ),
                }
                return ExecutionResult {
                    denial: Some(denial),
                    order: Some(order),
                    fees: fill.fee,
                    ..ExecutionResult::failed(&symbol, message)
                }
                .with_note(entry_note);
            }
        };

        let exit_fee = self.execution.taker_fee_rate * exit_price * fill.quantity;
        let closed = self
            .risk
            .book_round_trip(position, exit_price, fill.fee + exit_fee);
        let pnl = closed.pnl.unwrap_or(Decimal::ZERO);

        let exit = TradeRecord::entry(
            &symbol,
            fill.side.opposite(),
            exit_price,
            fill.quantity,
            exit_fee,
            closed.strategy.clone(),
            "unwind",
            unwind_order.id.clone(),
        )
        .into_exit(pnl)
        .with_dry_run(self.execution.dry_run);
        let exit_note = self.append_ledger(&exit);

        if let Some(sizing) = &fill.sizing {
            self.sizer.record_trade(sizing, pnl);
        }
        self.sizer.update_bankroll(self.risk.balance());

        warn!(symbol = %symbol, order_id = %unwind_order.id, exit_price = %exit_price, pnl = %pnl, "거부된 체결 청산 완료");
        ExecutionResult {
            denial: Some(denial.clone()),
            order: Some(order),
            fees: fill.fee + exit_fee,
            ..ExecutionResult::failed(
                &symbol,
                format!("Fill rejected by risk engine ({}), unwound @ {}", denial, exit_price),
            )
        }
        .with_pnl(pnl)
        .with_sizing(fill.sizing)
        .with_note(entry_note.or(exit_note))
    }

    // ==================== Exit ====================

    /// 포지션 청산.
    ///
    /// 메이커 청산은 전략이 지원할 때만 지정가로 대기하며 `Pending`을 반환합니다.
    /// 그 외에는 시장가로 즉시 청산하고 손익을 계산합니다.
    pub async fn exit_position(
        &mut self,
        symbol: &str,
        policy: ExitPolicy,
        reason: impl Into<String>,
    ) -> ExecutionResult {
        let reason = reason.into();
        let Some(position) = self.risk.position(symbol).cloned() else {
            return ExecutionResult::failed(symbol, format!("No open position: {}", symbol));
        };
        if self.orders.has_resting_exit(symbol) {
            return ExecutionResult::denied(symbol, DenialReason::OrderPending { symbol: symbol.to_string() });
        }

        let close_side = position.side.opposite();
        let maker_price = match policy {
            ExitPolicy::Maker { price } if self.strategy.supports_maker_exit => Some(price),
            ExitPolicy::Maker { .. } => {
                debug!(symbol, strategy = %self.strategy.tag, "메이커 청산 미지원, 시장가 청산");
                None
            }
            ExitPolicy::Immediate => None,
        };

        let submitted = match self
            .submit_with_retry(symbol, close_side, position.quantity, maker_price)
            .await
        {
            Ok(submitted) => submitted,
            Err(failure) => {
                warn!(symbol, attempts = failure.attempts, error = %failure.last_error, "청산 주문 실패");
                return ExecutionResult::failed(
                    symbol,
                    format!("Exit failed after {} attempts: {}", failure.attempts, failure.last_error),
                )
                .with_attempts(failure.attempts);
            }
        };
        let order = submitted.order;
        let attempts = submitted.attempts;

        if let Some(price) = maker_price {
            if !order.is_filled() {
                if let Err(e) = self.orders.track(order.clone(), OrderPurpose::Exit, reason) {
                    warn!(symbol, error = %e, "메이커 청산 추적 실패, 주문 취소");
                    let _ = self.exchange.cancel_order(&order.id).await;
                    return ExecutionResult::failed(symbol, e.to_string()).with_attempts(attempts);
                }
                info!(symbol, order_id = %order.id, price = %price, "메이커 청산 대기");
                return ExecutionResult::pending(symbol, order, format!("Maker exit resting @ {}", price))
                    .with_attempts(attempts);
            }
        }

        let Some(exit_price) = order.average_fill_price.or(maker_price) else {
            return ExecutionResult::failed(symbol, "Fill reported without a price").with_attempts(attempts);
        };
        let fee_rate = if maker_price.is_some() {
            self.execution.maker_fee_rate
        } else {
            self.execution.taker_fee_rate
        };
        let exit_fee = fee_rate * exit_price * position.quantity;
        self.settle(symbol, order, exit_price, exit_fee, reason)
            .with_attempts(attempts)
    }

    /// 손절 가격에 도달했으면 시장가로 청산합니다.
    pub async fn check_stop_loss(&mut self, symbol: &str, current_price: Price) -> Option<ExecutionResult> {
        if !self.risk.check_stop_loss(symbol, current_price) {
            return None;
        }
        warn!(symbol, price = %current_price, "손절 가격 도달");
        if let Some(cancel) = self.cancel_resting(symbol).await {
            // 취소가 확인되지 않은 메이커 청산이 살아 있으면 이중 청산 위험
            if self.orders.has_resting_exit(symbol) {
                error!(symbol, "메이커 청산 취소 실패, 손절 보류");
                return Some(ExecutionResult::failed(
                    symbol,
                    format!("Stop-loss deferred: {}", cancel.message),
                ));
            }
            // 취소 직전에 체결되어 이미 청산됨
            if !self.risk.has_position(symbol) {
                return Some(cancel);
            }
        }
        Some(self.exit_position(symbol, ExitPolicy::Immediate, "stop_loss").await)
    }

    /// 모든 오픈 포지션을 거래소 평가 가격으로 손절 검사합니다.
    ///
    /// 평가 가격을 조회하지 못한 심볼은 이번 검사에서 건너뜁니다.
    pub async fn check_stop_losses(&mut self) -> Vec<ExecutionResult> {
        let guarded: Vec<(String, Side)> = self
            .risk
            .open_positions()
            .filter(|p| p.stop_price.is_some())
            .map(|p| (p.symbol.clone(), p.side))
            .collect();

        let mut results = Vec::new();
        for (symbol, side) in guarded {
            let mark = match self.exchange.get_position_value(&symbol, side).await {
                Ok(mark) => mark,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "평가 가격 조회 실패");
                    continue;
                }
            };
            if let Some(result) = self.check_stop_loss(&symbol, mark).await {
                results.push(result);
            }
        }
        results
    }

    /// 청산 체결을 리스크 엔진과 원장에 반영합니다.
    fn settle(
        &mut self,
        symbol: &str,
        order: Order,
        exit_price: Price,
        exit_fee: Amount,
        reason: String,
    ) -> ExecutionResult {
        let entry_fee = self
            .risk
            .position(symbol)
            .map(|p| p.entry_fee)
            .unwrap_or(Decimal::ZERO);

        let Some(closed) = self.risk.settle_position(symbol, exit_price, entry_fee + exit_fee) else {
            return ExecutionResult::failed(symbol, format!("No open position: {}", symbol));
        };
        let pnl = closed.pnl.unwrap_or(Decimal::ZERO);

        let record = TradeRecord::entry(
            symbol,
            closed.side.opposite(),
            exit_price,
            closed.quantity,
            exit_fee,
            closed.strategy.clone(),
            reason,
            order.id.clone(),
        )
        .into_exit(pnl)
        .with_dry_run(self.execution.dry_run);
        let note = self.append_ledger(&record);

        if let Some(sizing) = self.entry_sizing.remove(symbol) {
            self.sizer.record_trade(&sizing, pnl);
        }
        self.sizer.update_bankroll(self.risk.balance());

        ExecutionResult::filled(
            symbol,
            order,
            exit_fee,
            format!("Exited {} @ {} pnl {}", closed.quantity, exit_price, pnl),
        )
        .with_pnl(pnl)
        .with_note(note)
    }

    // ==================== Resting Orders ====================

    /// 대기 주문의 체결을 확인합니다.
    ///
    /// 체결된 주문만 상태에 반영하며, 거래소가 취소/거부/만료한 주문은 추적에서
    /// 제거합니다. 부분 체결은 계속 대기합니다.
    pub async fn check_fill(&mut self) -> Vec<ExecutionResult> {
        let mut results = Vec::new();

        for order_id in self.orders.resting_ids() {
            let status = match self.exchange.get_order_status(&order_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "주문 상태 조회 실패");
                    continue;
                }
            };

            match status {
                OrderStatusType::Filled => {
                    if let Ok(resting) = self.orders.complete(&order_id, status) {
                        results.push(self.on_resting_fill(resting).await);
                    }
                }
                OrderStatusType::Cancelled | OrderStatusType::Rejected | OrderStatusType::Expired => {
                    if let Ok(resting) = self.orders.complete(&order_id, status) {
                        warn!(order_id = %order_id, status = %status, "대기 주문 종료");
                        let symbol = resting.order.symbol.clone();
                        results.push(ExecutionResult::cancelled(
                            &symbol,
                            resting.order,
                            format!("Resting order {}", status),
                        ));
                    }
                }
                OrderStatusType::Pending | OrderStatusType::Open | OrderStatusType::PartiallyFilled => {}
            }
        }

        results
    }

    async fn on_resting_fill(&mut self, resting: RestingOrder) -> ExecutionResult {
        let symbol = resting.order.symbol.clone();
        let Some(price) = resting.price() else {
            return ExecutionResult::failed(&symbol, "Resting order without a price");
        };
        let quantity = resting.order.quantity;
        let fee = self.execution.maker_fee_rate * price * quantity;
        let order = resting.order.filled_at(price);

        match resting.purpose {
            OrderPurpose::Entry(pending) => {
                let fill = EntryFill {
                    side: order.side,
                    price,
                    quantity,
                    fee,
                    stop_price: pending.stop_price,
                    leader: pending.leader,
                    sizing: pending.sizing,
                    reason: resting.reason,
                };
                self.finish_entry(&symbol, order, fill).await
            }
            OrderPurpose::Exit => {
                info!(symbol = %symbol, price = %price, "메이커 청산 체결");
                self.settle(&symbol, order, price, fee, resting.reason)
            }
        }
    }

    /// 모든 대기 주문(메이커 청산, 패시브 진입)을 취소합니다.
    ///
    /// 취소 직전에 체결된 주문은 체결로 처리합니다. 취소를 확인하지 못한 주문은
    /// 계속 추적하므로 다음 `check_fill`이나 재호출에서 다시 다룹니다.
    pub async fn cancel_pending_exits(&mut self) -> Vec<ExecutionResult> {
        let order_ids = self.orders.resting_ids();
        let mut results = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            results.push(self.cancel_one(&order_id).await);
        }
        if !results.is_empty() {
            info!(count = results.len(), remaining = self.orders.len(), "대기 주문 일괄 취소");
        }
        results
    }

    /// 심볼의 대기 메이커 청산을 취소합니다. 없으면 None.
    async fn cancel_resting(&mut self, symbol: &str) -> Option<ExecutionResult> {
        if !self.orders.has_resting_exit(symbol) {
            return None;
        }
        let order_id = self.orders.for_symbol(symbol)?.order.id.clone();
        Some(self.cancel_one(&order_id).await)
    }

    /// 대기 주문 하나를 취소합니다.
    ///
    /// 거래소가 취소나 종료 상태를 확인해 준 경우에만 추적에서 제거합니다.
    async fn cancel_one(&mut self, order_id: &str) -> ExecutionResult {
        let Some(symbol) = self.orders.get(order_id).map(|r| r.order.symbol.clone()) else {
            return ExecutionResult::failed("", format!("Order not tracked: {}", order_id));
        };

        let status = match self.exchange.cancel_order(order_id).await {
            Ok(true) => OrderStatusType::Cancelled,
            Ok(false) => match self.exchange.get_order_status(order_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(symbol = %symbol, order_id, error = %e, "취소 후 상태 조회 실패, 추적 유지");
                    return ExecutionResult::failed(&symbol, format!("Cancel state unknown: {}", e));
                }
            },
            Err(e) => {
                warn!(symbol = %symbol, order_id, error = %e, "주문 취소 실패, 추적 유지");
                return ExecutionResult::failed(&symbol, format!("Cancel failed: {}", e));
            }
        };

        if status.is_active() {
            warn!(symbol = %symbol, order_id, status = %status, "취소되지 않은 주문, 추적 유지");
            return ExecutionResult::failed(&symbol, format!("Resting order still {}", status));
        }

        let Ok(resting) = self.orders.complete(order_id, status) else {
            return ExecutionResult::failed(&symbol, format!("Order not tracked: {}", order_id));
        };
        match status {
            OrderStatusType::Filled => self.on_resting_fill(resting).await,
            OrderStatusType::Cancelled => {
                ExecutionResult::cancelled(&symbol, resting.order, "Resting order cancelled")
            }
            other => ExecutionResult::cancelled(
                &symbol,
                resting.order,
                format!("Resting order already {}", other),
            ),
        }
    }

    // ==================== Helpers ====================

    /// 주문을 제출합니다. 실패하면 고정 간격으로 최대 `max_order_retries`번 시도합니다.
    ///
    /// 첫 번째로 수락된 응답만 반환하므로 이후 시도는 없습니다.
    async fn submit_with_retry(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        limit_price: Option<Price>,
    ) -> Result<Submitted, SubmitFailure> {
        let max_attempts = self.execution.max_order_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result = match limit_price {
                Some(price) => self.exchange.place_limit_order(symbol, side, quantity, price).await,
                None => self.exchange.place_market_order(symbol, side, quantity).await,
            };

            match result {
                Ok(order) if Self::accepted(&order, limit_price.is_some()) => {
                    debug!(symbol, order_id = %order.id, attempt, "주문 수락");
                    return Ok(Submitted { order, attempts: attempt });
                }
                Ok(order) => {
                    last_error = format!("order {} returned status {}", order.id, order.status);
                    warn!(symbol, attempt, status = %order.status, "주문이 수락되지 않음");
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(symbol, attempt, retryable = e.is_retryable(), error = %e, "주문 제출 실패");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.execution.retry_delay()).await;
            }
        }

        Err(SubmitFailure {
            attempts: max_attempts,
            last_error,
        })
    }

    fn accepted(order: &Order, is_limit: bool) -> bool {
        if order.is_filled() {
            return order.average_fill_price.is_some() || order.limit_price.is_some();
        }
        is_limit && order.status.is_active()
    }

    fn append_ledger(&self, record: &TradeRecord) -> Option<String> {
        match self.ledger.append(record) {
            Ok(()) => None,
            Err(e) => {
                error!(market_id = %record.market_id, error = %e, "원장 기록 실패");
                Some(format!("ledger write failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_result_constructors() {
        let denied = ExecutionResult::denied("A", DenialReason::OrderPending { symbol: "A".into() });
        assert_eq!(denied.status, ExecutionStatus::Denied);
        assert!(!denied.success);
        assert_eq!(denied.message, "Order already pending: A");

        let order = Order::limit("o1", "A", Side::Sell, dec!(1), dec!(0.6));
        let pending = ExecutionResult::pending("A", order.clone(), "resting");
        assert!(pending.success);
        assert_eq!(pending.status, ExecutionStatus::Pending);

        let filled = ExecutionResult::filled("A", order, dec!(0.01), "done")
            .with_pnl(dec!(2))
            .with_note(Some("ledger write failed".into()));
        assert!(filled.success);
        assert_eq!(filled.pnl, Some(dec!(2)));
        assert_eq!(filled.message, "done (ledger write failed)");
    }

    #[test]
    fn test_accepted() {
        let resting = Order::limit("o1", "A", Side::Buy, dec!(1), dec!(0.5));
        assert!(ExecutionController::accepted(&resting, true));
        assert!(!ExecutionController::accepted(&resting, false));

        let filled = Order::market("o2", "A", Side::Buy, dec!(1)).filled_at(dec!(0.5));
        assert!(ExecutionController::accepted(&filled, false));

        let rejected = Order::market("o3", "A", Side::Buy, dec!(1)).with_status(OrderStatusType::Rejected);
        assert!(!ExecutionController::accepted(&rejected, false));
    }

    #[test]
    fn test_entry_request_builder() {
        let request = EntryRequest::new("A", Side::Buy, StakeSize::Notional(dec!(5)), dec!(0.5))
            .with_limit_price(dec!(0.49))
            .with_stop(dec!(0.4))
            .with_reason("signal")
            .with_leader("whale");
        assert_eq!(request.limit_price, Some(dec!(0.49)));
        assert_eq!(request.stop_price, Some(dec!(0.4)));
        assert_eq!(request.leader.as_deref(), Some("whale"));
    }
}
