//! # Trader Core
//!
//! 실행 코어 전반에서 공유하는 기본 타입을 제공합니다:
//! - 주문 방향, 주문 유형, 주문 상태
//! - 포지션과 거래 원장 레코드
//! - 에러 타입
//! - 설정 로딩
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
