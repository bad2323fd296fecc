//! 분수 Kelly 포지션 사이징.
//!
//! 모델 확률과 시장 확률의 차이(엣지)로 권장 투자 금액을 계산합니다:
//! - 엣지 가중 승률 추정 (클램프)
//! - 목표가/손절가 기반 또는 예측시장 가격 기반 손익비
//! - VPIN 독성에 따른 축소 및 거부
//! - 자금 비율/최소/최대 한도
//!
//! 금액은 `Decimal`, 확률과 비율은 `f64`입니다.

use crate::config::KellyConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};
use trader_core::{decimal_from_f64, Amount, DecimalExt, MONEY_DP};

/// 부동소수점 잡음으로 생기는 0에 가까운 엣지를 무시하기 위한 값.
const EDGE_EPSILON: f64 = 1e-9;

/// 사이징 신뢰 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// 양의 엣지 없음
    None,
    /// VPIN 독성으로 거부
    Toxic,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::None => "none",
            Confidence::Toxic => "toxic",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Kelly 사이징 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellySizing {
    /// 모델 확률 − 시장 확률
    pub edge: f64,
    /// 조정된 승률
    pub win_probability: f64,
    /// 손익비 (b)
    pub win_loss_ratio: f64,
    /// 전체 Kelly 비율
    pub full_kelly: f64,
    /// 분수 Kelly 비율 (VPIN 조정 후)
    pub fractional_kelly: f64,
    /// 권장 투자 금액
    pub position_size: Amount,
    /// 신뢰 등급
    pub confidence: Confidence,
}

impl KellySizing {
    /// 거래할 크기가 있는지 확인.
    pub fn is_tradable(&self) -> bool {
        self.position_size > Decimal::ZERO
    }

    fn rejected(edge: f64, win_probability: f64, win_loss_ratio: f64, full_kelly: f64, confidence: Confidence) -> Self {
        Self {
            edge,
            win_probability,
            win_loss_ratio,
            full_kelly,
            fractional_kelly: 0.0,
            position_size: Decimal::ZERO,
            confidence,
        }
    }
}

/// 청산된 거래 결과 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellyOutcome {
    pub timestamp: DateTime<Utc>,
    pub size: Amount,
    pub pnl: Amount,
    pub edge: f64,
    pub kelly_fraction: f64,
}

/// Kelly 거래 성과 통계.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellyPerformance {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: Amount,
    pub avg_kelly: f64,
    pub current_bankroll: Amount,
}

/// 분수 Kelly 포지션 사이저.
#[derive(Debug, Clone)]
pub struct KellyPositionSizer {
    config: KellyConfig,
    history: VecDeque<KellyOutcome>,
}

impl KellyPositionSizer {
    /// 주어진 설정으로 사이저 생성.
    pub fn new(config: KellyConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    /// 현재 자금.
    pub fn bankroll(&self) -> Amount {
        self.config.bankroll
    }

    /// 설정 참조 조회.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// 자금 갱신 (청산 후 잔고 동기화).
    pub fn update_bankroll(&mut self, bankroll: Amount) {
        debug!(old = %self.config.bankroll, new = %bankroll, "Kelly 자금 갱신");
        self.config.bankroll = bankroll;
    }

    /// 엣지로 추정한 승률.
    ///
    /// 엣지가 클수록 모델 확률 쪽으로 더 기울이되, 가중치는 상한으로 제한됩니다.
    pub fn estimate_win_probability(&self, model_p: f64, market_p: f64) -> f64 {
        let edge = model_p - market_p;
        let weight = (edge.abs() * self.config.edge_weight).min(self.config.edge_weight_cap);
        (model_p + edge * weight).clamp(
            self.config.min_win_probability,
            self.config.max_win_probability,
        )
    }

    /// 손익비 b.
    ///
    /// 목표가와 손절가가 모두 있으면 거리 비율, 아니면 이진 결과 가격 `(1 − p)/p`.
    pub fn win_loss_ratio(market_price: f64, target: Option<f64>, stop: Option<f64>) -> f64 {
        if let (Some(target), Some(stop)) = (target, stop) {
            let risk = (market_price - stop).abs();
            if risk <= 0.0 {
                return 1.0;
            }
            return (target - market_price).abs() / risk;
        }

        if market_price > 0.0 && market_price < 1.0 {
            (1.0 - market_price) / market_price
        } else {
            1.0
        }
    }

    /// 권장 포지션 크기를 계산합니다.
    ///
    /// # 인자
    /// * `model_p` - 모델이 추정한 확률
    /// * `market_p` - 시장이 암시하는 확률
    /// * `market_price` - 현재 시장 가격
    /// * `target` / `stop` - 목표가와 손절가 (둘 다 있을 때만 사용)
    /// * `vpin` - 현재 VPIN 독성 (0.0 ~ 1.0)
    pub fn calculate_position_size(
        &self,
        model_p: f64,
        market_p: f64,
        market_price: f64,
        target: Option<f64>,
        stop: Option<f64>,
        vpin: f64,
    ) -> KellySizing {
        let edge = model_p - market_p;
        let win_probability = self.estimate_win_probability(model_p, market_p);
        let b = Self::win_loss_ratio(market_price, target, stop);

        // 엣지가 없으면 가격과 무관하게 0. 음의 엣지는 Kelly 부호로 판단
        if edge.abs() <= EDGE_EPSILON || b <= 0.0 {
            return KellySizing::rejected(edge, win_probability, b, 0.0, Confidence::None);
        }

        let q = 1.0 - win_probability;
        let full_kelly = (win_probability * b - q) / b;
        if full_kelly <= 0.0 {
            return KellySizing::rejected(edge, win_probability, b, full_kelly, Confidence::None);
        }

        if vpin > self.config.toxic_vpin_veto {
            debug!(vpin, "독성 흐름으로 사이징 거부");
            return KellySizing::rejected(edge, win_probability, b, full_kelly, Confidence::Toxic);
        }

        let fractional = full_kelly * self.config.kelly_fraction;
        let adjusted = fractional * (1.0 - vpin.max(0.0) * self.config.max_vpin_reduction);
        if adjusted <= 0.0 {
            return KellySizing::rejected(edge, win_probability, b, full_kelly, Confidence::None);
        }

        let bankroll = self.config.bankroll;
        let raw = bankroll * decimal_from_f64(adjusted, 8);
        let cap = self
            .config
            .max_position
            .min(bankroll * decimal_from_f64(self.config.max_position_pct, 8));
        let position_size = raw.min(cap).max(self.config.min_position).round_half_away(MONEY_DP);

        let confidence = self.confidence_for(edge);

        debug!(
            edge,
            win_probability,
            win_loss_ratio = b,
            full_kelly,
            adjusted,
            position_size = %position_size,
            confidence = %confidence,
            "Kelly 사이징"
        );

        KellySizing {
            edge,
            win_probability,
            win_loss_ratio: b,
            full_kelly,
            fractional_kelly: adjusted,
            position_size,
            confidence,
        }
    }

    fn confidence_for(&self, edge: f64) -> Confidence {
        let edge = edge.abs();
        if edge > self.config.high_confidence_edge {
            Confidence::High
        } else if edge > self.config.medium_confidence_edge {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    // ==================== Performance ====================

    /// 청산된 거래 결과 기록.
    pub fn record_trade(&mut self, sizing: &KellySizing, pnl: Amount) {
        self.record_trade_at(sizing, pnl, Utc::now());
    }

    /// 지정 시각으로 거래 결과 기록.
    pub fn record_trade_at(&mut self, sizing: &KellySizing, pnl: Amount, timestamp: DateTime<Utc>) {
        self.history.push_back(KellyOutcome {
            timestamp,
            size: sizing.position_size,
            pnl,
            edge: sizing.edge,
            kelly_fraction: sizing.fractional_kelly,
        });
        while self.history.len() > self.config.history_limit.max(1) {
            self.history.pop_front();
        }
    }

    /// 기록된 거래 결과.
    pub fn history(&self) -> impl Iterator<Item = &KellyOutcome> {
        self.history.iter()
    }

    /// 성과 통계. 기록이 없으면 None.
    pub fn performance_stats(&self) -> Option<KellyPerformance> {
        if self.history.is_empty() {
            return None;
        }

        let total_trades = self.history.len();
        let wins = self.history.iter().filter(|o| o.pnl > Decimal::ZERO).count();
        let total_pnl: Decimal = self.history.iter().map(|o| o.pnl).sum();
        let avg_kelly =
            self.history.iter().map(|o| o.kelly_fraction).sum::<f64>() / total_trades as f64;

        let stats = KellyPerformance {
            total_trades,
            wins,
            losses: total_trades - wins,
            win_rate: wins as f64 / total_trades as f64,
            total_pnl,
            avg_kelly,
            current_bankroll: self.config.bankroll,
        };
        info!(
            total_trades,
            win_rate = stats.win_rate,
            total_pnl = %stats.total_pnl,
            "Kelly 성과 통계"
        );
        Some(stats)
    }
}

impl Default for KellyPositionSizer {
    fn default() -> Self {
        Self::new(KellyConfig::default())
    }
}
