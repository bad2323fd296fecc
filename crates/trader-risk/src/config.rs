//! 리스크 관리 설정.
//!
//! 리스크 엔진 한도, Kelly 사이징 계수, VPIN 임계값을 정의합니다.
//! 경험적으로 정해진 계수(엣지 가중치, VPIN 감쇠율, 임계값)는 모두 설정값으로
//! 노출되며, 기본값은 운영에서 쓰던 값입니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// ==================== Risk Engine ====================

/// 리스크 엔진 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// 시작 잔고 (기본값: 10000)
    #[serde(default = "default_start_balance")]
    pub start_balance: Decimal,

    /// 거래당 최대 명목 금액 (기본값: 10)
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,

    /// 최대 일일 손실 금액 (기본값: 50)
    /// daily_pnl이 -max_daily_loss 이하가 되면 거래가 중지됩니다
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,

    /// 최고 잔고 대비 최대 낙폭 비율 (기본값: 0.10 = 10%)
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// 연속 손실 쿨다운 기준 (기본값: 3)
    /// 도달하면 한 사이클만 거부하고 카운터를 초기화합니다
    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,

    /// 하루 최대 거래 수 (기본값: 20)
    #[serde(default = "default_daily_trade_limit")]
    pub daily_trade_limit: u32,

    /// 리더당 최대 오픈 포지션 수 (카피 트레이딩, 기본값: 제한 없음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_positions_per_leader: Option<u32>,

    /// 리더 최소 승률 (카피 트레이딩, 기본값: 검사 안 함)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_leader_win_rate: Option<f64>,

    /// 리더 승률 계산에 쓰는 최근 거래 수 (기본값: 20)
    #[serde(default = "default_leader_winrate_window")]
    pub leader_winrate_window: usize,

    /// 진입 시 손절 가격을 자동 설정할 비율 (기본값: 설정 안 함)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_stop_loss_pct: Option<f64>,
}

fn default_start_balance() -> Decimal {
    dec!(10000)
}

fn default_max_position_size() -> Decimal {
    dec!(10)
}

fn default_max_daily_loss() -> Decimal {
    dec!(50)
}

fn default_max_drawdown_pct() -> f64 {
    0.10
}

fn default_consecutive_loss_limit() -> u32 {
    3
}

fn default_daily_trade_limit() -> u32 {
    20
}

fn default_leader_winrate_window() -> usize {
    20
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            start_balance: default_start_balance(),
            max_position_size: default_max_position_size(),
            max_daily_loss: default_max_daily_loss(),
            max_drawdown_pct: default_max_drawdown_pct(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            daily_trade_limit: default_daily_trade_limit(),
            max_positions_per_leader: None,
            min_leader_win_rate: None,
            leader_winrate_window: default_leader_winrate_window(),
            default_stop_loss_pct: None,
        }
    }
}

impl RiskConfig {
    /// 보수적인 설정 (낮은 한도).
    pub fn conservative() -> Self {
        Self {
            max_position_size: dec!(5),
            max_daily_loss: dec!(25),
            max_drawdown_pct: 0.05,
            consecutive_loss_limit: 2,
            daily_trade_limit: 10,
            default_stop_loss_pct: Some(0.03),
            ..Self::default()
        }
    }

    /// 공격적인 설정 (높은 한도).
    pub fn aggressive() -> Self {
        Self {
            max_position_size: dec!(50),
            max_daily_loss: dec!(200),
            max_drawdown_pct: 0.20,
            consecutive_loss_limit: 5,
            daily_trade_limit: 50,
            ..Self::default()
        }
    }

    /// 카피 트레이딩 한도 설정.
    pub fn with_leader_limits(mut self, max_positions: u32, min_win_rate: Option<f64>) -> Self {
        self.max_positions_per_leader = Some(max_positions);
        self.min_leader_win_rate = min_win_rate;
        self
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.start_balance <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "start_balance must be greater than 0".into(),
            ));
        }

        if self.max_position_size <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "max_position_size must be greater than 0".into(),
            ));
        }

        if self.max_daily_loss <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "max_daily_loss must be greater than 0".into(),
            ));
        }

        if !(self.max_drawdown_pct > 0.0 && self.max_drawdown_pct <= 1.0) {
            return Err(ConfigValidationError::InvalidValue(
                "max_drawdown_pct must be in (0, 1]".into(),
            ));
        }

        if self.consecutive_loss_limit == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "consecutive_loss_limit must be at least 1".into(),
            ));
        }

        if let Some(rate) = self.min_leader_win_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigValidationError::InvalidValue(
                    "min_leader_win_rate must be in [0, 1]".into(),
                ));
            }
            if self.leader_winrate_window == 0 {
                return Err(ConfigValidationError::InvalidValue(
                    "leader_winrate_window must be at least 1".into(),
                ));
            }
        }

        if let Some(pct) = self.default_stop_loss_pct {
            if !(pct > 0.0 && pct < 1.0) {
                return Err(ConfigValidationError::InvalidValue(
                    "default_stop_loss_pct must be in (0, 1)".into(),
                ));
            }
        }

        Ok(())
    }
}

// ==================== Kelly Sizing ====================

/// 분수 Kelly 포지션 사이저 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyConfig {
    /// 사이징 기준 자금 (기본값: 1000)
    #[serde(default = "default_bankroll")]
    pub bankroll: Decimal,

    /// Full Kelly에 곱하는 비율 (기본값: 0.25)
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,

    /// 자금 대비 최대 포지션 비율 (기본값: 0.10)
    #[serde(default = "default_kelly_max_position_pct")]
    pub max_position_pct: f64,

    /// 최소 거래 금액 (기본값: 5)
    #[serde(default = "default_min_position")]
    pub min_position: Decimal,

    /// 최대 거래 금액 (기본값: 50)
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,

    /// 승률 추정 시 엣지 가중치 배수 (기본값: 2.0)
    #[serde(default = "default_edge_weight")]
    pub edge_weight: f64,

    /// 엣지 가중치 상한 (기본값: 0.3)
    #[serde(default = "default_edge_weight_cap")]
    pub edge_weight_cap: f64,

    /// 추정 승률 하한 (기본값: 0.05)
    #[serde(default = "default_min_win_probability")]
    pub min_win_probability: f64,

    /// 추정 승률 상한 (기본값: 0.95)
    #[serde(default = "default_max_win_probability")]
    pub max_win_probability: f64,

    /// 이 값을 넘는 VPIN이면 크기 0 (기본값: 0.8)
    #[serde(default = "default_toxic_vpin_veto")]
    pub toxic_vpin_veto: f64,

    /// VPIN 1.0일 때의 최대 감쇠율 (기본값: 0.5)
    #[serde(default = "default_max_vpin_reduction")]
    pub max_vpin_reduction: f64,

    /// high 신뢰도 엣지 기준 (기본값: 0.10)
    #[serde(default = "default_high_confidence_edge")]
    pub high_confidence_edge: f64,

    /// medium 신뢰도 엣지 기준 (기본값: 0.05)
    #[serde(default = "default_medium_confidence_edge")]
    pub medium_confidence_edge: f64,

    /// 보관할 거래 결과 수 (기본값: 500)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_bankroll() -> Decimal {
    dec!(1000)
}

fn default_kelly_fraction() -> f64 {
    0.25
}

fn default_kelly_max_position_pct() -> f64 {
    0.10
}

fn default_min_position() -> Decimal {
    dec!(5)
}

fn default_max_position() -> Decimal {
    dec!(50)
}

fn default_edge_weight() -> f64 {
    2.0
}

fn default_edge_weight_cap() -> f64 {
    0.3
}

fn default_min_win_probability() -> f64 {
    0.05
}

fn default_max_win_probability() -> f64 {
    0.95
}

fn default_toxic_vpin_veto() -> f64 {
    0.8
}

fn default_max_vpin_reduction() -> f64 {
    0.5
}

fn default_high_confidence_edge() -> f64 {
    0.10
}

fn default_medium_confidence_edge() -> f64 {
    0.05
}

fn default_history_limit() -> usize {
    500
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            bankroll: default_bankroll(),
            kelly_fraction: default_kelly_fraction(),
            max_position_pct: default_kelly_max_position_pct(),
            min_position: default_min_position(),
            max_position: default_max_position(),
            edge_weight: default_edge_weight(),
            edge_weight_cap: default_edge_weight_cap(),
            min_win_probability: default_min_win_probability(),
            max_win_probability: default_max_win_probability(),
            toxic_vpin_veto: default_toxic_vpin_veto(),
            max_vpin_reduction: default_max_vpin_reduction(),
            high_confidence_edge: default_high_confidence_edge(),
            medium_confidence_edge: default_medium_confidence_edge(),
            history_limit: default_history_limit(),
        }
    }
}

impl KellyConfig {
    /// 자금 지정.
    pub fn with_bankroll(mut self, bankroll: Decimal) -> Self {
        self.bankroll = bankroll;
        self
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.bankroll < Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "bankroll must not be negative".into(),
            ));
        }

        if !(self.kelly_fraction > 0.0 && self.kelly_fraction <= 1.0) {
            return Err(ConfigValidationError::InvalidValue(
                "kelly_fraction must be in (0, 1]".into(),
            ));
        }

        if !(self.max_position_pct > 0.0 && self.max_position_pct <= 1.0) {
            return Err(ConfigValidationError::InvalidValue(
                "max_position_pct must be in (0, 1]".into(),
            ));
        }

        if self.min_position < Decimal::ZERO || self.min_position > self.max_position {
            return Err(ConfigValidationError::InvalidValue(
                "min_position must be in [0, max_position]".into(),
            ));
        }

        if !(self.min_win_probability >= 0.0
            && self.min_win_probability < self.max_win_probability
            && self.max_win_probability <= 1.0)
        {
            return Err(ConfigValidationError::InvalidValue(
                "win probability clamp must satisfy 0 <= min < max <= 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.max_vpin_reduction) {
            return Err(ConfigValidationError::InvalidValue(
                "max_vpin_reduction must be in [0, 1]".into(),
            ));
        }

        if self.medium_confidence_edge > self.high_confidence_edge {
            return Err(ConfigValidationError::InvalidValue(
                "medium_confidence_edge must not exceed high_confidence_edge".into(),
            ));
        }

        Ok(())
    }
}

// ==================== VPIN ====================

/// VPIN 독성 탐지기 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpinConfig {
    /// 버킷 하나의 목표 거래량 (기본값: 100)
    #[serde(default = "default_bucket_size")]
    pub bucket_size: f64,

    /// 계산에 쓰는 최대 버킷 수 (기본값: 50)
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,

    /// 버킷 유효 시간 (초, 기본값: 300)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// elevated 시작 임계값 (기본값: 0.3)
    #[serde(default = "default_threshold_elevated")]
    pub threshold_elevated: f64,

    /// high 시작 임계값 (기본값: 0.5)
    #[serde(default = "default_threshold_high")]
    pub threshold_high: f64,

    /// critical(킬 스위치) 임계값 (기본값: 0.6)
    #[serde(default = "default_threshold_critical")]
    pub threshold_critical: f64,

    /// 킬 스위치 쿨다운 (초, 기본값: 300)
    #[serde(default = "default_kill_cooldown_secs")]
    pub kill_cooldown_secs: u64,

    /// 추세 분석용 VPIN 이력 길이 (기본값: 100)
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

fn default_bucket_size() -> f64 {
    100.0
}

fn default_num_buckets() -> usize {
    50
}

fn default_window_seconds() -> u64 {
    300
}

fn default_threshold_elevated() -> f64 {
    0.3
}

fn default_threshold_high() -> f64 {
    0.5
}

fn default_threshold_critical() -> f64 {
    0.6
}

fn default_kill_cooldown_secs() -> u64 {
    300
}

fn default_history_len() -> usize {
    100
}

impl Default for VpinConfig {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            num_buckets: default_num_buckets(),
            window_seconds: default_window_seconds(),
            threshold_elevated: default_threshold_elevated(),
            threshold_high: default_threshold_high(),
            threshold_critical: default_threshold_critical(),
            kill_cooldown_secs: default_kill_cooldown_secs(),
            history_len: default_history_len(),
        }
    }
}

impl VpinConfig {
    /// 버킷 크기와 개수 지정.
    pub fn with_buckets(mut self, bucket_size: f64, num_buckets: usize) -> Self {
        self.bucket_size = bucket_size;
        self.num_buckets = num_buckets;
        self
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(self.bucket_size > 0.0) {
            return Err(ConfigValidationError::InvalidValue(
                "bucket_size must be greater than 0".into(),
            ));
        }

        if self.num_buckets == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "num_buckets must be at least 1".into(),
            ));
        }

        let ordered = 0.0 < self.threshold_elevated
            && self.threshold_elevated < self.threshold_high
            && self.threshold_high < self.threshold_critical
            && self.threshold_critical <= 1.0;
        if !ordered {
            return Err(ConfigValidationError::InvalidValue(
                "thresholds must satisfy 0 < elevated < high < critical <= 1".into(),
            ));
        }

        Ok(())
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}
