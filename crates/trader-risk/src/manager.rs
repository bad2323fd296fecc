//! 리스크 엔진 구현.
//!
//! 잔고, 오픈 포지션, 낙폭, 연속 손실을 소유하고 모든 진입을 검사합니다:
//! - 일일 손실 / 최대 낙폭 도달 시 거래 중지 (`reset_daily` 전까지 유지)
//! - 연속 손실 쿨다운 (한 사이클만 거부)
//! - 거래당 크기, 일일 거래 수, 심볼당 1포지션
//! - 카피 트레이딩 리더 한도
//!
//! 거부는 에러가 아니라 [`RiskValidation`]으로 반환됩니다.

use crate::config::RiskConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use trader_core::{decimal_from_f64, Amount, DecimalExt, Position, Price, Side};

/// 거래 거부 사유.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// 이미 거래 중지 상태
    Halted { reason: String },
    /// 일일 손실 한도 도달
    DailyLossLimit { daily_pnl: Amount, limit: Amount },
    /// 최대 낙폭 도달
    MaxDrawdown { drawdown_pct: f64, limit: f64 },
    /// 연속 손실 쿨다운 (한 번만 거부)
    LossStreakCooldown { consecutive_losses: u32 },
    /// 거래당 최대 크기 초과
    PositionTooLarge { proposed: Amount, max: Amount },
    /// 일일 거래 수 한도 도달
    DailyTradeLimit { trades_today: u32, limit: u32 },
    /// 심볼에 이미 포지션이 있음
    AlreadyInPosition { symbol: String },
    /// 리더 오픈 포지션 한도 도달
    LeaderPositionLimit { leader: String, open: u32, max: u32 },
    /// 리더 최근 승률 미달
    LeaderWinRate { leader: String, win_rate: f64, min: f64 },
    /// VPIN 킬 스위치 작동 중
    ToxicityKill { vpin: f64 },
    /// VPIN 철수 신호
    ToxicityWithdraw { vpin: f64 },
    /// 같은 심볼에 대기 중인 주문이 있음
    OrderPending { symbol: String },
    /// 사이징 결과 거래할 크기가 없음
    NoEdge { confidence: String },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::Halted { reason } => write!(f, "Trading halted: {}", reason),
            DenialReason::DailyLossLimit { daily_pnl, limit } => {
                write!(f, "Daily loss limit hit: {} (limit -{})", daily_pnl, limit)
            }
            DenialReason::MaxDrawdown { drawdown_pct, limit } => write!(
                f,
                "Max drawdown hit: {:.1}% (limit {:.1}%)",
                drawdown_pct * 100.0,
                limit * 100.0
            ),
            DenialReason::LossStreakCooldown { consecutive_losses } => {
                write!(f, "Cooldown: {} consecutive losses", consecutive_losses)
            }
            DenialReason::PositionTooLarge { proposed, max } => {
                write!(f, "Position size {} > max {}", proposed, max)
            }
            DenialReason::DailyTradeLimit { trades_today, limit } => {
                write!(f, "Daily trade limit reached: {}/{}", trades_today, limit)
            }
            DenialReason::AlreadyInPosition { symbol } => {
                write!(f, "Already in position: {}", symbol)
            }
            DenialReason::LeaderPositionLimit { leader, open, max } => {
                write!(f, "Leader {} has {} open positions (max {})", leader, open, max)
            }
            DenialReason::LeaderWinRate { leader, win_rate, min } => write!(
                f,
                "Leader {} win rate {:.0}% < {:.0}%",
                leader,
                win_rate * 100.0,
                min * 100.0
            ),
            DenialReason::ToxicityKill { vpin } => {
                write!(f, "VPIN kill switch active (vpin {:.3})", vpin)
            }
            DenialReason::ToxicityWithdraw { vpin } => {
                write!(f, "Toxic flow, withdrawing (vpin {:.3})", vpin)
            }
            DenialReason::OrderPending { symbol } => {
                write!(f, "Order already pending: {}", symbol)
            }
            DenialReason::NoEdge { confidence } => {
                write!(f, "No tradable size (confidence {})", confidence)
            }
        }
    }
}

/// 리스크 검증 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskValidation {
    /// 검사를 통과했는지 여부
    pub is_valid: bool,
    /// 거부 사유
    pub reason: Option<DenialReason>,
}

impl RiskValidation {
    /// 유효한 결과 생성.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    /// 무효한 결과 생성.
    pub fn invalid(reason: DenialReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }

    /// 사람이 읽을 수 있는 메시지.
    pub fn message(&self) -> String {
        self.reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "OK".to_string())
    }
}

/// 리스크 엔진이 소유하는 포트폴리오 상태.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub start_balance: Amount,
    pub current_balance: Amount,
    pub peak_balance: Amount,
    pub daily_pnl: Amount,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub consecutive_losses: u32,
    pub trades_today: u32,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub last_reset_at: DateTime<Utc>,
    /// 심볼 → 오픈 포지션
    pub positions: HashMap<String, Position>,
    /// 리더 → 오픈 포지션 수
    pub leader_open_counts: HashMap<String, u32>,
    /// 리더 → 최근 승패 (true = 승)
    pub leader_results: HashMap<String, VecDeque<bool>>,
}

impl PortfolioState {
    /// 시작 잔고로 초기 상태 생성.
    pub fn new(start_balance: Amount) -> Self {
        Self {
            start_balance,
            current_balance: start_balance,
            peak_balance: start_balance,
            daily_pnl: Decimal::ZERO,
            total_trades: 0,
            wins: 0,
            losses: 0,
            consecutive_losses: 0,
            trades_today: 0,
            halted: false,
            halt_reason: None,
            last_reset_at: Utc::now(),
            positions: HashMap::new(),
            leader_open_counts: HashMap::new(),
            leader_results: HashMap::new(),
        }
    }

    /// 청산된 거래 기준 승률 (청산 거래가 없으면 0).
    pub fn win_rate(&self) -> f64 {
        let closed = self.wins + self.losses;
        if closed == 0 {
            return 0.0;
        }
        self.wins as f64 / closed as f64
    }

    /// 최고 잔고 대비 낙폭 비율.
    pub fn drawdown_pct(&self) -> f64 {
        if self.peak_balance <= Decimal::ZERO {
            return 0.0;
        }
        ((self.peak_balance - self.current_balance) / self.peak_balance).to_f64_lossy()
    }

    /// 리더의 최근 승률. 기록이 `window`개 미만이면 None.
    pub fn leader_win_rate(&self, leader: &str, window: usize) -> Option<f64> {
        let results = self.leader_results.get(leader)?;
        if window == 0 || results.len() < window {
            return None;
        }
        let wins = results.iter().rev().take(window).filter(|w| **w).count();
        Some(wins as f64 / window as f64)
    }
}

/// 외부에 노출되는 리스크 상태 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub balance: Amount,
    pub peak_balance: Amount,
    pub daily_pnl: Amount,
    pub drawdown_pct: f64,
    pub win_rate: f64,
    pub total_trades: u32,
    pub trades_today: u32,
    pub consecutive_losses: u32,
    pub open_positions: usize,
    pub halted: bool,
    pub halt_reason: Option<String>,
}

/// 포지션 수명 주기와 거래 허가를 담당하는 리스크 엔진.
///
/// 메인 루프 한 곳에서만 변경되므로 내부 잠금이 없습니다.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
    state: PortfolioState,
}

impl RiskEngine {
    /// 설정의 시작 잔고로 새 리스크 엔진 생성.
    pub fn new(config: RiskConfig) -> Self {
        let state = PortfolioState::new(config.start_balance);
        info!(start_balance = %config.start_balance, "리스크 엔진 초기화");
        Self { config, state }
    }

    /// 설정 참조 조회.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// 포트폴리오 상태 조회.
    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    /// 현재 잔고 조회.
    pub fn balance(&self) -> Amount {
        self.state.current_balance
    }

    /// 심볼의 오픈 포지션 조회.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.state.positions.get(symbol)
    }

    /// 모든 오픈 포지션.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.state.positions.values()
    }

    /// 심볼에 오픈 포지션이 있는지 확인.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.state.positions.contains_key(symbol)
    }

    // ==================== Trade Permission ====================

    /// 제안된 거래를 검사합니다.
    ///
    /// 순서대로 평가하며 첫 실패가 사유가 됩니다. 일일 손실과 낙폭 위반은
    /// 거래 중지 상태로 전환하고, 연속 손실 쿨다운은 카운터를 초기화합니다.
    pub fn can_trade(&mut self, symbol: &str, proposed_size: Amount) -> RiskValidation {
        self.can_trade_for(symbol, proposed_size, None)
    }

    /// 리더 태그를 포함해 검사합니다 (카피 트레이딩).
    pub fn can_trade_for(
        &mut self,
        symbol: &str,
        proposed_size: Amount,
        leader: Option<&str>,
    ) -> RiskValidation {
        let validation = self.evaluate(symbol, proposed_size, leader);
        if let Some(reason) = &validation.reason {
            debug!(symbol, proposed_size = %proposed_size, reason = %reason, "거래 거부");
        }
        validation
    }

    fn evaluate(&mut self, symbol: &str, proposed_size: Amount, leader: Option<&str>) -> RiskValidation {
        // Check 1: already halted
        if self.state.halted {
            return RiskValidation::invalid(DenialReason::Halted {
                reason: self.state.halt_reason.clone().unwrap_or_default(),
            });
        }

        // Check 2: daily loss limit
        if self.state.daily_pnl <= -self.config.max_daily_loss {
            let reason = DenialReason::DailyLossLimit {
                daily_pnl: self.state.daily_pnl,
                limit: self.config.max_daily_loss,
            };
            self.halt(&reason);
            return RiskValidation::invalid(reason);
        }

        // Check 3: drawdown
        let drawdown = self.state.drawdown_pct();
        if drawdown >= self.config.max_drawdown_pct {
            let reason = DenialReason::MaxDrawdown {
                drawdown_pct: drawdown,
                limit: self.config.max_drawdown_pct,
            };
            self.halt(&reason);
            return RiskValidation::invalid(reason);
        }

        // Check 4: loss streak cooldown, one skipped cycle
        if self.state.consecutive_losses >= self.config.consecutive_loss_limit {
            let consecutive_losses = self.state.consecutive_losses;
            self.state.consecutive_losses = 0;
            info!(consecutive_losses, "연속 손실 쿨다운: 이번 사이클 거래 건너뜀");
            return RiskValidation::invalid(DenialReason::LossStreakCooldown { consecutive_losses });
        }

        // Check 5: size
        if proposed_size > self.config.max_position_size {
            return RiskValidation::invalid(DenialReason::PositionTooLarge {
                proposed: proposed_size,
                max: self.config.max_position_size,
            });
        }

        // Check 6: daily trade count
        if self.state.trades_today >= self.config.daily_trade_limit {
            return RiskValidation::invalid(DenialReason::DailyTradeLimit {
                trades_today: self.state.trades_today,
                limit: self.config.daily_trade_limit,
            });
        }

        // Check 7: one position per symbol
        if self.state.positions.contains_key(symbol) {
            return RiskValidation::invalid(DenialReason::AlreadyInPosition {
                symbol: symbol.to_string(),
            });
        }

        // Check 8: leader limits
        if let Some(leader) = leader {
            if let Some(max) = self.config.max_positions_per_leader {
                let open = self.state.leader_open_counts.get(leader).copied().unwrap_or(0);
                if open >= max {
                    return RiskValidation::invalid(DenialReason::LeaderPositionLimit {
                        leader: leader.to_string(),
                        open,
                        max,
                    });
                }
            }
            if let Some(min) = self.config.min_leader_win_rate {
                if let Some(win_rate) =
                    self.state.leader_win_rate(leader, self.config.leader_winrate_window)
                {
                    if win_rate < min {
                        return RiskValidation::invalid(DenialReason::LeaderWinRate {
                            leader: leader.to_string(),
                            win_rate,
                            min,
                        });
                    }
                }
            }
        }

        RiskValidation::valid()
    }

    fn halt(&mut self, reason: &DenialReason) {
        self.state.halted = true;
        self.state.halt_reason = Some(reason.to_string());
        warn!(reason = %reason, "거래 중지");
    }

    // ==================== Position Lifecycle ====================

    /// 포지션을 등록합니다. 명목 금액으로 다시 검사한 뒤 삽입합니다.
    pub fn open_position(&mut self, position: Position) -> RiskValidation {
        let validation =
            self.can_trade_for(&position.symbol, position.notional(), position.leader.as_deref());
        if !validation.is_valid {
            warn!(symbol = %position.symbol, reason = %validation.message(), "포지션 등록 거부");
            return validation;
        }

        self.insert_position(position);
        validation
    }

    /// 검사 없이 포지션을 등록합니다.
    ///
    /// 거래소에서 이미 체결되어 되돌리지 못한 수량을 추적할 때 씁니다.
    /// 같은 심볼에 포지션이 있으면 넘겨받은 포지션을 그대로 돌려줍니다.
    pub fn adopt_position(&mut self, position: Position) -> Result<(), Position> {
        if self.has_position(&position.symbol) {
            return Err(position);
        }
        warn!(symbol = %position.symbol, quantity = %position.quantity, "검사 없이 포지션 등록");
        self.insert_position(position);
        Ok(())
    }

    /// 열리자마자 청산된 거래를 장부에 반영합니다.
    ///
    /// 포지션 맵은 건드리지 않고 거래 수, 손익, 연속 손실만 갱신합니다.
    pub fn book_round_trip(&mut self, mut position: Position, exit_price: Price, fee: Amount) -> Position {
        self.count_open(&position);
        self.apply_close(&mut position, exit_price, fee);
        position
    }

    fn insert_position(&mut self, position: Position) {
        self.count_open(&position);
        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry_price = %position.entry_price,
            quantity = %position.quantity,
            strategy = %position.strategy,
            "포지션 오픈"
        );
        self.state.positions.insert(position.symbol.clone(), position);
    }

    fn count_open(&mut self, position: &Position) {
        self.state.trades_today += 1;
        self.state.total_trades += 1;
        if let Some(leader) = &position.leader {
            *self.state.leader_open_counts.entry(leader.clone()).or_insert(0) += 1;
        }
    }

    /// 포지션을 청산하고 손익을 반환합니다. 포지션이 없으면 None.
    pub fn close_position(&mut self, symbol: &str, exit_price: Price, fee: Amount) -> Option<Amount> {
        self.settle_position(symbol, exit_price, fee).and_then(|p| p.pnl)
    }

    /// 포지션을 청산하고 `pnl`이 채워진 포지션을 반환합니다.
    pub fn settle_position(&mut self, symbol: &str, exit_price: Price, fee: Amount) -> Option<Position> {
        let Some(mut position) = self.state.positions.remove(symbol) else {
            warn!(symbol, "청산할 포지션 없음");
            return None;
        };
        self.apply_close(&mut position, exit_price, fee);
        Some(position)
    }

    fn apply_close(&mut self, position: &mut Position, exit_price: Price, fee: Amount) {
        let pnl = position.pnl_at(exit_price, fee);
        position.pnl = Some(pnl);

        self.state.daily_pnl += pnl;
        self.state.current_balance += pnl;
        if self.state.current_balance > self.state.peak_balance {
            self.state.peak_balance = self.state.current_balance;
        }

        let won = pnl > Decimal::ZERO;
        if won {
            self.state.wins += 1;
            self.state.consecutive_losses = 0;
        } else {
            self.state.losses += 1;
            self.state.consecutive_losses += 1;
        }

        if let Some(leader) = &position.leader {
            if let Some(count) = self.state.leader_open_counts.get_mut(leader) {
                *count = count.saturating_sub(1);
            }
            let window = self.config.leader_winrate_window.max(1);
            let results = self.state.leader_results.entry(leader.clone()).or_default();
            results.push_back(won);
            while results.len() > window {
                results.pop_front();
            }
        }

        info!(
            symbol = %position.symbol,
            exit_price = %exit_price,
            fee = %fee,
            pnl = %pnl,
            balance = %self.state.current_balance,
            consecutive_losses = self.state.consecutive_losses,
            "{}",
            if won { "포지션 청산 (이익)" } else { "포지션 청산 (손실)" }
        );
    }

    // ==================== Stop Loss ====================

    /// 오픈 포지션의 손절 가격 도달 여부.
    pub fn check_stop_loss(&self, symbol: &str, current_price: Price) -> bool {
        self.state
            .positions
            .get(symbol)
            .map(|p| p.stop_hit(current_price))
            .unwrap_or(false)
    }

    /// 진입 가격과 비율로 손절 가격을 계산합니다.
    ///
    /// 롱은 `entry × (1 − pct)`, 숏은 `entry × (1 + pct)`.
    pub fn compute_stop_price(entry_price: Price, side: Side, stop_pct: f64) -> Price {
        let pct = decimal_from_f64(stop_pct, 8);
        match side {
            Side::Buy => entry_price * (Decimal::ONE - pct),
            Side::Sell => entry_price * (Decimal::ONE + pct),
        }
    }

    // ==================== Daily Reset ====================

    /// 일일 카운터를 초기화하고 거래 중지를 해제합니다.
    ///
    /// 최고 잔고와 연속 손실 카운터는 유지됩니다.
    pub fn reset_daily(&mut self) {
        self.reset_daily_at(Utc::now());
    }

    /// 지정 시각 기준으로 일일 초기화.
    pub fn reset_daily_at(&mut self, now: DateTime<Utc>) {
        let was_halted = self.state.halted;
        self.state.daily_pnl = Decimal::ZERO;
        self.state.trades_today = 0;
        self.state.halted = false;
        self.state.halt_reason = None;
        self.state.last_reset_at = now;
        info!(was_halted, "일일 카운터 초기화");
    }

    /// UTC 날짜가 바뀌었으면 일일 초기화를 수행하고 true를 반환합니다.
    pub fn roll_day_if_needed(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() > self.state.last_reset_at.date_naive() {
            self.reset_daily_at(now);
            return true;
        }
        false
    }

    /// 현재 상태 요약.
    pub fn get_status(&self) -> RiskStatus {
        RiskStatus {
            balance: self.state.current_balance,
            peak_balance: self.state.peak_balance,
            daily_pnl: self.state.daily_pnl,
            drawdown_pct: self.state.drawdown_pct(),
            win_rate: self.state.win_rate(),
            total_trades: self.state.total_trades,
            trades_today: self.state.trades_today,
            consecutive_losses: self.state.consecutive_losses,
            open_positions: self.state.positions.len(),
            halted: self.state.halted,
            halt_reason: self.state.halt_reason.clone(),
        }
    }
}
