//! 백그라운드 독성 모니터.
//!
//! 체결 흐름 소스를 주기적으로 폴링해 자체 [`VpinDetector`]에 입력하고, 최신 신호를
//! `watch` 채널로 게시합니다. 읽는 쪽은 항상 완성된 신호 하나를 봅니다.
//!
//! 소스 에러나 오래된 신호는 `withdraw`로 닫힌 쪽 실패합니다.

use crate::vpin::{FlowTrade, TradePermission, VpinDetector, VpinSignal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use trader_core::TraderResult;

/// 체결 흐름 소스.
#[async_trait]
pub trait FlowSource: Send {
    /// 마지막 호출 이후의 새 체결을 반환합니다.
    async fn poll_trades(&mut self) -> TraderResult<Vec<FlowTrade>>;
}

/// 진입 전에 조회하는 독성 게이트.
///
/// 컨트롤러가 직접 소유한 탐지기와 백그라운드 모니터 핸들이 같은 방식으로
/// 쓰이도록 합니다.
pub trait ToxicityGate: Send + Sync {
    /// 체결을 입력합니다. 모니터 핸들처럼 자체 소스가 있으면 무시합니다.
    fn observe(&mut self, _trade: FlowTrade, _now: DateTime<Utc>) {}

    /// 지정 시각 기준 신호.
    fn signal_at(&mut self, now: DateTime<Utc>) -> VpinSignal;

    /// 지정 시각 기준 진입 허가.
    fn permission_at(&mut self, now: DateTime<Utc>) -> TradePermission {
        TradePermission::from(&self.signal_at(now))
    }
}

impl ToxicityGate for VpinDetector {
    fn observe(&mut self, trade: FlowTrade, now: DateTime<Utc>) {
        self.add_trade_at(trade, now);
    }

    fn signal_at(&mut self, now: DateTime<Utc>) -> VpinSignal {
        self.evaluate_at(now)
    }
}

/// 모니터 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// 폴링 주기 (밀리초, 기본값: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// 이 시간보다 오래된 신호는 무효 (초, 기본값: 30)
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stale_after_secs() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// 모니터가 게시하는 최신 신호의 읽기 핸들.
#[derive(Debug, Clone)]
pub struct ToxicityHandle {
    rx: watch::Receiver<VpinSignal>,
    stale_after: chrono::Duration,
}

impl ToxicityHandle {
    /// 마지막으로 게시된 신호.
    pub fn latest(&self) -> VpinSignal {
        self.rx.borrow().clone()
    }

    /// 다음 게시를 기다립니다. 모니터가 종료되면 false.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl ToxicityGate for ToxicityHandle {
    fn signal_at(&mut self, now: DateTime<Utc>) -> VpinSignal {
        let signal = self.latest();
        if now - signal.timestamp > self.stale_after {
            tracing::debug!(published_at = %signal.timestamp, "오래된 VPIN 신호");
            return VpinSignal::fail_closed(now);
        }
        signal
    }
}

/// 독성 모니터.
pub struct ToxicityMonitor<S> {
    detector: VpinDetector,
    source: S,
    poll_interval: Duration,
    tx: watch::Sender<VpinSignal>,
}

impl<S: FlowSource> ToxicityMonitor<S> {
    /// 모니터와 읽기 핸들을 생성합니다. 첫 폴링 전까지 핸들은 `withdraw`를 봅니다.
    pub fn new(detector: VpinDetector, source: S, config: &MonitorConfig) -> (Self, ToxicityHandle) {
        let (tx, rx) = watch::channel(VpinSignal::fail_closed(Utc::now()));
        let handle = ToxicityHandle {
            rx,
            stale_after: chrono::Duration::seconds(config.stale_after_secs as i64),
        };
        let monitor = Self {
            detector,
            source,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            tx,
        };
        (monitor, handle)
    }

    /// 한 번 폴링하고 신호를 게시합니다.
    pub async fn poll_once(&mut self) -> VpinSignal {
        let now = Utc::now();
        let signal = match self.source.poll_trades().await {
            Ok(trades) => {
                self.detector.add_batch(trades, now);
                self.detector.evaluate_at(now)
            }
            Err(e) => {
                tracing::warn!(error = %e, "체결 흐름 조회 실패, 철수 신호 게시");
                VpinSignal::fail_closed(now)
            }
        };
        self.tx.send_replace(signal.clone());
        signal
    }

    /// 종료 신호까지 폴링 루프를 실행하고 탐지기를 돌려줍니다.
    pub async fn run(mut self, shutdown: CancellationToken) -> VpinDetector {
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }

                _ = shutdown.cancelled() => {
                    tracing::info!("ToxicityMonitor 종료");
                    break;
                }
            }
        }

        self.detector
    }
}

/// 독성 모니터를 백그라운드 task로 시작합니다.
///
/// # Returns
///
/// 읽기 핸들과 백그라운드 task의 JoinHandle
pub fn start_toxicity_monitor<S>(
    detector: VpinDetector,
    source: S,
    config: &MonitorConfig,
    shutdown: CancellationToken,
) -> (ToxicityHandle, tokio::task::JoinHandle<VpinDetector>)
where
    S: FlowSource + 'static,
{
    let (monitor, handle) = ToxicityMonitor::new(detector, source, config);
    let task = tokio::spawn(async move { monitor.run(shutdown).await });
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VpinConfig;
    use crate::vpin::{ToxicityLevel, VpinAction};
    use std::collections::VecDeque;
    use trader_core::{Side, TraderError};

    struct ScriptedSource {
        batches: VecDeque<TraderResult<Vec<FlowTrade>>>,
    }

    #[async_trait]
    impl FlowSource for ScriptedSource {
        async fn poll_trades(&mut self) -> TraderResult<Vec<FlowTrade>> {
            self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn source(batches: Vec<TraderResult<Vec<FlowTrade>>>) -> ScriptedSource {
        ScriptedSource {
            batches: batches.into(),
        }
    }

    fn detector() -> VpinDetector {
        VpinDetector::new(VpinConfig::default().with_buckets(1000.0, 50))
    }

    #[tokio::test]
    async fn test_initial_signal_fails_closed() {
        let (_monitor, mut handle) =
            ToxicityMonitor::new(detector(), source(vec![]), &MonitorConfig::default());
        let permission = handle.permission_at(Utc::now());
        assert!(!permission.permitted);
        assert_eq!(permission.toxicity, ToxicityLevel::Unknown);
    }

    #[tokio::test]
    async fn test_poll_publishes_signal() {
        let balanced = vec![
            FlowTrade::new(100.0, Side::Buy),
            FlowTrade::new(100.0, Side::Sell),
        ];
        let (mut monitor, mut handle) =
            ToxicityMonitor::new(detector(), source(vec![Ok(balanced)]), &MonitorConfig::default());

        let signal = monitor.poll_once().await;
        assert_eq!(signal.action, VpinAction::Trade);
        assert_eq!(handle.latest(), signal);
        assert!(handle.permission_at(Utc::now()).permitted);
    }

    #[tokio::test]
    async fn test_source_error_withdraws() {
        let batches = vec![
            Ok(vec![FlowTrade::new(10.0, Side::Buy), FlowTrade::new(10.0, Side::Sell)]),
            Err(TraderError::Network("feed down".into())),
        ];
        let (mut monitor, handle) =
            ToxicityMonitor::new(detector(), source(batches), &MonitorConfig::default());

        assert_eq!(monitor.poll_once().await.action, VpinAction::Trade);
        assert_eq!(monitor.poll_once().await.action, VpinAction::Withdraw);
        assert_eq!(handle.latest().level, ToxicityLevel::Unknown);
    }

    #[tokio::test]
    async fn test_stale_signal_withdraws() {
        let (mut monitor, mut handle) = ToxicityMonitor::new(
            detector(),
            source(vec![Ok(vec![FlowTrade::new(10.0, Side::Buy), FlowTrade::new(10.0, Side::Sell)])]),
            &MonitorConfig::default(),
        );
        monitor.poll_once().await;

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(handle.signal_at(later).action, VpinAction::Withdraw);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_shutdown() {
        let shutdown = CancellationToken::new();
        let one_sided = vec![FlowTrade::new(1000.0, Side::Sell)];
        let (mut handle, task) = start_toxicity_monitor(
            detector(),
            source(vec![Ok(one_sided)]),
            &MonitorConfig::default(),
            shutdown.clone(),
        );

        assert!(handle.changed().await);
        assert_eq!(handle.latest().action, VpinAction::Kill);

        shutdown.cancel();
        let detector = task.await.unwrap();
        assert_eq!(detector.bucket_count(), 1);
        assert!(detector.kill_switch_active());
    }
}
