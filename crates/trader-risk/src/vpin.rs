//! VPIN (Volume-Synchronized Probability of Informed Trading) 독성 탐지기.
//!
//! 체결을 거래량 버킷으로 묶어 매수/매도 불균형을 측정합니다. 불균형이 크면
//! 정보 거래자(독성 흐름)가 있다는 신호로 보고 스프레드 확대, 철수, 킬 스위치를
//! 권고합니다.
//!
//! # 등급
//!
//! | VPIN | 등급 | 행동 |
//! |------|------|------|
//! | < 0.3 | normal | trade |
//! | 0.3 ~ 0.5 | elevated | widen_spreads |
//! | 0.5 ~ 0.6 | high | withdraw |
//! | ≥ 0.6 | critical | kill |
//!
//! 데이터가 없으면 `unknown` / `withdraw`로 닫힌 쪽으로 실패합니다. critical에 도달하면
//! 쿨다운 동안 킬 스위치가 유지되며 그 사이의 VPIN 값과 무관하게 `kill`을 반환합니다.

use crate::config::VpinConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use trader_core::Side;

/// 추세 계산에 필요한 최소 VPIN 기록 수.
const TREND_SAMPLES: usize = 10;

/// 추세 판정 임계값.
const TREND_THRESHOLD: f64 = 0.05;

// ==================== Trades & Buckets ====================

/// 체결 방향 분류 방법.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideHint {
    /// 호출자가 방향을 알고 있음
    Explicit { side: Side },
    /// 틱 규칙: 직전 가격보다 높으면 매수, 낮으면 매도, 같으면 `tie`
    Tick { price: f64, prev_price: f64, tie: Side },
}

/// 탐지기에 입력되는 체결 하나.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowTrade {
    pub size: f64,
    pub hint: SideHint,
}

impl FlowTrade {
    /// 방향이 명시된 체결.
    pub fn new(size: f64, side: Side) -> Self {
        Self {
            size,
            hint: SideHint::Explicit { side },
        }
    }

    /// 틱 규칙으로 분류할 체결.
    pub fn tick(size: f64, price: f64, prev_price: f64, tie: Side) -> Self {
        Self {
            size,
            hint: SideHint::Tick {
                price,
                prev_price,
                tie,
            },
        }
    }

    /// 체결 방향 결정.
    pub fn side(&self) -> Side {
        match self.hint {
            SideHint::Explicit { side } => side,
            SideHint::Tick {
                price,
                prev_price,
                tie,
            } => {
                if price > prev_price {
                    Side::Buy
                } else if price < prev_price {
                    Side::Sell
                } else {
                    tie
                }
            }
        }
    }
}

/// 거래량 버킷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeBucket {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
}

impl TradeBucket {
    fn new(opened_at: DateTime<Utc>) -> Self {
        Self {
            buy_volume: 0.0,
            sell_volume: 0.0,
            opened_at,
            sealed_at: None,
        }
    }

    /// 총 거래량.
    pub fn total(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }

    /// 버킷 독성 `|buy − sell| / total`. 거래량이 없으면 0.
    pub fn toxicity(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        (self.buy_volume - self.sell_volume).abs() / total
    }

    fn add(&mut self, side: Side, size: f64) {
        match side {
            Side::Buy => self.buy_volume += size,
            Side::Sell => self.sell_volume += size,
        }
    }
}

// ==================== Signals ====================

/// 독성 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToxicityLevel {
    Normal,
    Elevated,
    High,
    Critical,
    /// 데이터 없음 또는 계산 실패
    Unknown,
}

impl std::fmt::Display for ToxicityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToxicityLevel::Normal => "normal",
            ToxicityLevel::Elevated => "elevated",
            ToxicityLevel::High => "high",
            ToxicityLevel::Critical => "critical",
            ToxicityLevel::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// 권고 행동.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VpinAction {
    Trade,
    WidenSpreads,
    Withdraw,
    Kill,
}

impl VpinAction {
    /// 새 진입을 허용하는 행동인지 확인.
    pub fn permits_entry(&self) -> bool {
        matches!(self, VpinAction::Trade | VpinAction::WidenSpreads)
    }
}

impl std::fmt::Display for VpinAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VpinAction::Trade => "trade",
            VpinAction::WidenSpreads => "widen_spreads",
            VpinAction::Withdraw => "withdraw",
            VpinAction::Kill => "kill",
        };
        write!(f, "{}", s)
    }
}

/// VPIN 평가 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpinSignal {
    /// 계산된 VPIN. 데이터가 없으면 None.
    pub vpin: Option<f64>,
    pub level: ToxicityLevel,
    pub action: VpinAction,
    pub spread_adjustment: f64,
    pub kill_switch_active: bool,
    pub timestamp: DateTime<Utc>,
}

impl VpinSignal {
    /// 데이터가 없거나 계산할 수 없을 때의 신호.
    pub fn fail_closed(timestamp: DateTime<Utc>) -> Self {
        Self {
            vpin: None,
            level: ToxicityLevel::Unknown,
            action: VpinAction::Withdraw,
            spread_adjustment: 2.0,
            kill_switch_active: false,
            timestamp,
        }
    }

    /// 리스크 계산에 쓰는 VPIN 값 (없으면 0).
    pub fn vpin_or_zero(&self) -> f64 {
        self.vpin.unwrap_or(0.0)
    }
}

/// 거래 허가 판정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePermission {
    pub permitted: bool,
    pub action: VpinAction,
    pub vpin: Option<f64>,
    pub toxicity: ToxicityLevel,
    pub spread_adjustment: f64,
    /// 권장 크기 배율 (`1 / spread_adjustment`)
    pub size_adjustment: f64,
    pub message: String,
}

impl From<&VpinSignal> for TradePermission {
    fn from(signal: &VpinSignal) -> Self {
        let size_adjustment = if signal.spread_adjustment > 0.0 {
            1.0 / signal.spread_adjustment
        } else {
            0.0
        };
        let message = match (signal.action, signal.vpin) {
            (VpinAction::Kill, Some(v)) => format!("Kill switch active (VPIN {:.3})", v),
            (VpinAction::Kill, None) => "Kill switch active".to_string(),
            (_, None) => "No flow data, withdrawing".to_string(),
            (action, Some(v)) => format!("VPIN {:.3} ({}): {}", v, signal.level, action),
        };
        Self {
            permitted: signal.action.permits_entry(),
            action: signal.action,
            vpin: signal.vpin,
            toxicity: signal.level,
            spread_adjustment: signal.spread_adjustment,
            size_adjustment,
            message,
        }
    }
}

/// VPIN 추세.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VpinTrend {
    Rising,
    Falling,
    Stable,
    InsufficientData,
}

/// 탐지기 통계.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpinStats {
    pub current_vpin: Option<f64>,
    pub level: ToxicityLevel,
    pub sealed_buckets: usize,
    pub live_bucket_volume: f64,
    pub total_trades: u64,
    pub total_volume: f64,
    pub avg_vpin: Option<f64>,
    pub max_vpin: Option<f64>,
    pub kill_switch_active: bool,
    pub trend: VpinTrend,
}

// ==================== Detector ====================

/// VPIN 독성 탐지기.
///
/// 단일 작성자 구조입니다. 백그라운드에서 공유하려면 [`crate::monitor`]를 사용하세요.
#[derive(Debug, Clone)]
pub struct VpinDetector {
    config: VpinConfig,
    current: TradeBucket,
    buckets: VecDeque<TradeBucket>,
    history: VecDeque<(DateTime<Utc>, f64)>,
    kill_until: Option<DateTime<Utc>>,
    total_trades: u64,
    total_volume: f64,
}

impl VpinDetector {
    /// 새 탐지기 생성.
    pub fn new(config: VpinConfig) -> Self {
        Self {
            current: TradeBucket::new(Utc::now()),
            buckets: VecDeque::with_capacity(config.num_buckets),
            history: VecDeque::with_capacity(config.history_len),
            kill_until: None,
            total_trades: 0,
            total_volume: 0.0,
            config,
        }
    }

    /// 설정 참조 조회.
    pub fn config(&self) -> &VpinConfig {
        &self.config
    }

    /// 봉인된 버킷 수.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// 체결 추가. 버킷이 봉인되면 새 VPIN을 반환합니다.
    pub fn add_trade(&mut self, trade: FlowTrade) -> Option<f64> {
        self.add_trade_at(trade, Utc::now())
    }

    /// 지정 시각으로 체결 추가.
    pub fn add_trade_at(&mut self, trade: FlowTrade, now: DateTime<Utc>) -> Option<f64> {
        if !trade.size.is_finite() || trade.size <= 0.0 {
            debug!(size = trade.size, "유효하지 않은 체결 크기 무시");
            return None;
        }

        if self.current.total() <= 0.0 {
            self.current.opened_at = now;
        }
        self.current.add(trade.side(), trade.size);
        self.total_trades += 1;
        self.total_volume += trade.size;

        if self.current.total() < self.config.bucket_size {
            return None;
        }

        let mut sealed = std::mem::replace(&mut self.current, TradeBucket::new(now));
        sealed.sealed_at = Some(now);
        debug!(
            buy = sealed.buy_volume,
            sell = sealed.sell_volume,
            toxicity = sealed.toxicity(),
            "버킷 봉인"
        );
        self.buckets.push_back(sealed);
        self.prune(now);

        let vpin = self.calculate_vpin_at(now)?;
        self.history.push_back((now, vpin));
        while self.history.len() > self.config.history_len.max(1) {
            self.history.pop_front();
        }
        Some(vpin)
    }

    /// 여러 체결을 한 번에 추가하고 마지막으로 계산된 VPIN을 반환합니다.
    pub fn add_batch<I>(&mut self, trades: I, now: DateTime<Utc>) -> Option<f64>
    where
        I: IntoIterator<Item = FlowTrade>,
    {
        trades
            .into_iter()
            .fold(None, |last, trade| self.add_trade_at(trade, now).or(last))
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.config.window_seconds as i64);
        while let Some(front) = self.buckets.front() {
            let sealed_at = front.sealed_at.unwrap_or(front.opened_at);
            if sealed_at < cutoff || self.buckets.len() > self.config.num_buckets {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// 현재 VPIN 계산. 데이터가 없으면 None.
    pub fn calculate_vpin(&mut self) -> Option<f64> {
        self.calculate_vpin_at(Utc::now())
    }

    /// 지정 시각 기준 VPIN 계산.
    ///
    /// 봉인된 버킷과 거래량이 있는 진행 중 버킷의 독성 평균입니다.
    pub fn calculate_vpin_at(&mut self, now: DateTime<Utc>) -> Option<f64> {
        self.prune(now);

        let live = (self.current.total() > 0.0).then_some(&self.current);
        let toxicities: Vec<f64> = self
            .buckets
            .iter()
            .chain(live)
            .map(TradeBucket::toxicity)
            .collect();

        if toxicities.is_empty() {
            return None;
        }
        let vpin = toxicities.iter().sum::<f64>() / toxicities.len() as f64;
        if !vpin.is_finite() {
            return None;
        }
        self.arm_if_critical(vpin, now);
        Some(vpin)
    }

    /// critical 이상이면 쿨다운 동안 킬 스위치를 유지합니다.
    ///
    /// 계산된 모든 VPIN이 거치므로 평가 사이에 지나간 급등도 놓치지 않습니다.
    fn arm_if_critical(&mut self, vpin: f64, now: DateTime<Utc>) {
        if self.classify(vpin) != ToxicityLevel::Critical {
            return;
        }
        let already = self.kill_switch_active_at(now);
        let until = now + Duration::seconds(self.config.kill_cooldown_secs as i64);
        self.kill_until = Some(self.kill_until.map_or(until, |prev| prev.max(until)));
        if already {
            debug!(vpin, until = %until, "VPIN critical, 킬 스위치 연장");
        } else {
            warn!(vpin, until = %until, "VPIN 킬 스위치 작동");
        }
    }

    /// VPIN 값에 대한 등급.
    pub fn classify(&self, vpin: f64) -> ToxicityLevel {
        if vpin >= self.config.threshold_critical {
            ToxicityLevel::Critical
        } else if vpin >= self.config.threshold_high {
            ToxicityLevel::High
        } else if vpin >= self.config.threshold_elevated {
            ToxicityLevel::Elevated
        } else {
            ToxicityLevel::Normal
        }
    }

    /// 권장 스프레드 배율.
    ///
    /// elevated 구간에서 1.0 → 1.5, high 구간에서 1.5 → 2.0으로 선형 증가합니다.
    pub fn spread_adjustment(&self, vpin: f64) -> f64 {
        let normal = self.config.threshold_elevated;
        let high = self.config.threshold_high;
        let critical = self.config.threshold_critical;

        if vpin < normal {
            1.0
        } else if vpin < high {
            1.0 + 0.5 * (vpin - normal) / (high - normal)
        } else if vpin < critical {
            1.5 + 0.5 * (vpin - high) / (critical - high)
        } else {
            2.0
        }
    }

    /// 킬 스위치 작동 여부.
    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch_active_at(Utc::now())
    }

    /// 지정 시각 기준 킬 스위치 작동 여부.
    pub fn kill_switch_active_at(&self, now: DateTime<Utc>) -> bool {
        self.kill_until.map(|until| now < until).unwrap_or(false)
    }

    /// 현재 신호 평가.
    pub fn evaluate(&mut self) -> VpinSignal {
        self.evaluate_at(Utc::now())
    }

    /// 지정 시각 기준 신호 평가. 킬 스위치가 작동 중이면 값과 무관하게 Kill.
    pub fn evaluate_at(&mut self, now: DateTime<Utc>) -> VpinSignal {
        let vpin = self.calculate_vpin_at(now);

        if self.kill_switch_active_at(now) {
            return VpinSignal {
                vpin,
                level: ToxicityLevel::Critical,
                action: VpinAction::Kill,
                spread_adjustment: 2.0,
                kill_switch_active: true,
                timestamp: now,
            };
        }

        let Some(vpin) = vpin else {
            return VpinSignal::fail_closed(now);
        };

        let level = self.classify(vpin);
        let action = match level {
            ToxicityLevel::Normal => VpinAction::Trade,
            ToxicityLevel::Elevated => VpinAction::WidenSpreads,
            ToxicityLevel::High | ToxicityLevel::Unknown => VpinAction::Withdraw,
            ToxicityLevel::Critical => VpinAction::Kill,
        };

        VpinSignal {
            vpin: Some(vpin),
            level,
            action,
            spread_adjustment: self.spread_adjustment(vpin),
            kill_switch_active: false,
            timestamp: now,
        }
    }

    /// 새 진입 허가 판정.
    pub fn check_trade_permission(&mut self) -> TradePermission {
        self.check_trade_permission_at(Utc::now())
    }

    /// 지정 시각 기준 진입 허가 판정.
    pub fn check_trade_permission_at(&mut self, now: DateTime<Utc>) -> TradePermission {
        TradePermission::from(&self.evaluate_at(now))
    }

    /// 최근 VPIN 추세.
    ///
    /// 마지막 10개 기록의 앞/뒤 절반 평균을 비교합니다.
    pub fn trend(&self) -> VpinTrend {
        if self.history.len() < TREND_SAMPLES {
            return VpinTrend::InsufficientData;
        }

        let recent: Vec<f64> = self
            .history
            .iter()
            .skip(self.history.len() - TREND_SAMPLES)
            .map(|(_, v)| *v)
            .collect();
        let half = TREND_SAMPLES / 2;
        let first = recent[..half].iter().sum::<f64>() / half as f64;
        let second = recent[half..].iter().sum::<f64>() / (TREND_SAMPLES - half) as f64;

        if second > first + TREND_THRESHOLD {
            VpinTrend::Rising
        } else if second < first - TREND_THRESHOLD {
            VpinTrend::Falling
        } else {
            VpinTrend::Stable
        }
    }

    /// 기록된 VPIN 값 (오래된 순).
    pub fn history(&self) -> impl Iterator<Item = &(DateTime<Utc>, f64)> {
        self.history.iter()
    }

    /// 탐지기 통계.
    pub fn stats_at(&mut self, now: DateTime<Utc>) -> VpinStats {
        let current_vpin = self.calculate_vpin_at(now);
        let level = current_vpin
            .map(|v| self.classify(v))
            .unwrap_or(ToxicityLevel::Unknown);
        let values = self.history.iter().map(|(_, v)| *v);
        let avg_vpin = (!self.history.is_empty())
            .then(|| values.clone().sum::<f64>() / self.history.len() as f64);
        let max_vpin = values.fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))));

        VpinStats {
            current_vpin,
            level,
            sealed_buckets: self.buckets.len(),
            live_bucket_volume: self.current.total(),
            total_trades: self.total_trades,
            total_volume: self.total_volume,
            avg_vpin,
            max_vpin,
            kill_switch_active: self.kill_switch_active_at(now),
            trend: self.trend(),
        }
    }

    /// 현재 시각 기준 통계.
    pub fn stats(&mut self) -> VpinStats {
        self.stats_at(Utc::now())
    }

    /// 모든 버킷, 기록, 킬 스위치를 초기화합니다.
    pub fn reset(&mut self) {
        self.current = TradeBucket::new(Utc::now());
        self.buckets.clear();
        self.history.clear();
        self.kill_until = None;
        self.total_trades = 0;
        self.total_volume = 0.0;
        info!("VPIN 탐지기 초기화");
    }
}

impl Default for VpinDetector {
    fn default() -> Self {
        Self::new(VpinConfig::default())
    }
}
