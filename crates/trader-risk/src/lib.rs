//! 리스크 관리 시스템.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 리스크 엔진: 포지션 수명 주기, 거래 중지, 연속 손실 쿨다운
//! - 분수 Kelly 포지션 사이징
//! - VPIN 주문 흐름 독성 탐지와 킬 스위치
//! - 백그라운드 독성 모니터
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::{RiskConfig, RiskEngine};
//!
//! let mut engine = RiskEngine::new(RiskConfig::default());
//!
//! // 진입 전 검사
//! let validation = engine.can_trade("BTC-USD", dec!(10));
//! if validation.is_valid {
//!     // 주문 진행
//! }
//! ```

pub mod config;
pub mod manager;
pub mod monitor;
pub mod position_sizing;
pub mod vpin;

// 주요 타입 재내보내기
pub use config::{ConfigValidationError, KellyConfig, RiskConfig, VpinConfig};
pub use manager::{DenialReason, PortfolioState, RiskEngine, RiskStatus, RiskValidation};
pub use monitor::{
    start_toxicity_monitor, FlowSource, MonitorConfig, ToxicityGate, ToxicityHandle,
    ToxicityMonitor,
};
pub use position_sizing::{Confidence, KellyOutcome, KellyPerformance, KellyPositionSizer, KellySizing};
pub use vpin::{
    FlowTrade, SideHint, ToxicityLevel, TradeBucket, TradePermission, VpinAction, VpinDetector,
    VpinSignal, VpinStats, VpinTrend,
};
