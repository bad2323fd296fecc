//! 트레이딩 세션 루프.
//!
//! 한 사이클마다:
//! 1. UTC 날짜가 바뀌었으면 일일 카운터 초기화
//! 2. VPIN 킬 스위치가 켜져 있으면 사이클 건너뜀
//! 3. 대기 주문 체결 확인
//! 4. 전략 콜백 실행
//! 5. 거래 중지 상태면 (설정에 따라) 종료
//!
//! 사이클 사이에는 고정 간격으로 대기하며, 종료 토큰이 취소되면 바로 빠져나옵니다.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trader_risk::VpinAction;

use crate::config::SessionConfig;
use crate::executor::{ExecutionController, ExecutionStatus};

/// 사이클마다 호출되는 전략.
#[async_trait]
pub trait CycleStrategy: Send {
    /// 전략 이름.
    fn name(&self) -> &str;

    /// 한 사이클 실행. 에러는 로그만 남기고 루프는 계속됩니다.
    async fn on_cycle(&mut self, controller: &mut ExecutionController) -> anyhow::Result<()>;
}

/// 세션 종료 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 종료 토큰 취소
    Shutdown,
    /// 리스크 엔진 거래 중지
    Halted,
    /// 최대 사이클 수 도달
    MaxCycles,
}

/// 세션 실행 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// 실행한 사이클 수 (건너뛴 사이클 포함)
    pub cycles: u64,
    /// 킬 스위치로 건너뛴 사이클 수
    pub skipped_cycles: u64,
    /// 전략 에러 수
    pub strategy_errors: u64,
    /// 대기 주문 체결 수
    pub resting_fills: u64,
    /// 손절 청산 수
    pub stop_exits: u64,
    /// 종료 사유
    pub stop_reason: Option<StopReason>,
}

/// 트레이딩 세션.
pub struct TradingSession<S> {
    config: SessionConfig,
    controller: ExecutionController,
    strategy: S,
}

impl<S: CycleStrategy> TradingSession<S> {
    pub fn new(config: SessionConfig, controller: ExecutionController, strategy: S) -> Self {
        Self {
            config,
            controller,
            strategy,
        }
    }

    pub fn controller(&self) -> &ExecutionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ExecutionController {
        &mut self.controller
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// 세션을 종료하고 컨트롤러와 전략을 돌려받습니다.
    pub fn into_parts(self) -> (ExecutionController, S) {
        (self.controller, self.strategy)
    }

    /// 사이클 하나를 실행합니다. 거래 중지로 루프를 멈춰야 하면 false.
    pub async fn run_cycle(&mut self, summary: &mut SessionSummary) -> bool {
        summary.cycles += 1;

        if self.controller.roll_day_if_needed(Utc::now()) {
            info!("새 거래일, 일일 카운터 초기화");
        }

        let permission = self.controller.check_trade_permission();
        if permission.action == VpinAction::Kill {
            summary.skipped_cycles += 1;
            warn!(vpin = ?permission.vpin, "킬 스위치 작동 중, 사이클 건너뜀");
            return true;
        }

        for result in self.controller.check_fill().await {
            if result.status == ExecutionStatus::Filled {
                summary.resting_fills += 1;
            }
            debug!(symbol = %result.symbol, status = ?result.status, message = %result.message, "대기 주문 처리");
        }

        for result in self.controller.check_stop_losses().await {
            if result.status == ExecutionStatus::Filled {
                summary.stop_exits += 1;
            }
            info!(symbol = %result.symbol, status = ?result.status, message = %result.message, "손절 처리");
        }

        if let Err(e) = self.strategy.on_cycle(&mut self.controller).await {
            summary.strategy_errors += 1;
            warn!(strategy = self.strategy.name(), error = %e, "전략 사이클 실패");
        }

        if self.config.stop_on_halt && self.controller.risk().state().halted {
            warn!(
                reason = ?self.controller.risk().state().halt_reason,
                "거래 중지, 세션 종료"
            );
            return false;
        }

        true
    }

    /// 종료 토큰이 취소되거나 거래가 중지될 때까지 루프를 실행합니다.
    pub async fn run(&mut self, shutdown: CancellationToken) -> SessionSummary {
        let interval = self.config.cycle_interval();
        let mut summary = SessionSummary::default();
        info!(
            strategy = self.strategy.name(),
            interval_ms = interval.as_millis() as u64,
            "트레이딩 세션 시작"
        );

        loop {
            if shutdown.is_cancelled() {
                summary.stop_reason = Some(StopReason::Shutdown);
                break;
            }

            if !self.run_cycle(&mut summary).await {
                summary.stop_reason = Some(StopReason::Halted);
                break;
            }

            if let Some(max) = self.config.max_cycles {
                if summary.cycles >= max {
                    summary.stop_reason = Some(StopReason::MaxCycles);
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}

                _ = shutdown.cancelled() => {
                    summary.stop_reason = Some(StopReason::Shutdown);
                    break;
                }
            }
        }

        info!(
            cycles = summary.cycles,
            skipped = summary.skipped_cycles,
            errors = summary.strategy_errors,
            stop_reason = ?summary.stop_reason,
            "트레이딩 세션 종료"
        );
        summary
    }
}
