//! 주문 실행 및 포지션 관리.
//!
//! 이 crate는 다음을 제공합니다:
//! - 리스크/독성 게이트를 거치는 실행 컨트롤러
//! - 대기 지정가 주문 추적
//! - 추가 전용 NDJSON 거래 원장
//! - 엔진 설정 로딩
//! - 고정 간격 트레이딩 세션 루프
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::{EngineConfig, EntryRequest, ExecutionController, ExitPolicy, StakeSize};
//!
//! let config = EngineConfig::load("config/engine.toml")?;
//! let mut controller = ExecutionController::from_config(&config, exchange)?;
//!
//! let request = EntryRequest::new("YES-1", Side::Buy, StakeSize::Notional(dec!(5)), dec!(0.55));
//! let result = controller.enter_position(request).await;
//! ```

pub mod config;
pub mod executor;
pub mod ledger;
pub mod order_manager;
pub mod session;

// 주요 타입 재내보내기
pub use config::{EngineConfig, EntryStyle, ExecutionConfig, SessionConfig, StrategyProfile};
pub use executor::{
    ControllerStatus, EntryRequest, ExecutionController, ExecutionResult, ExecutionStatus,
    ExitPolicy, StakeSize,
};
pub use ledger::{Ledger, LedgerError, LedgerSummary};
pub use order_manager::{
    OrderEvent, OrderManager, OrderManagerError, OrderPurpose, PendingEntry, RestingOrder,
};
pub use session::{CycleStrategy, SessionSummary, StopReason, TradingSession};
