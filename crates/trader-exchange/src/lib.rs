//! 거래소 어댑터.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `ExchangeAdapter` trait: 실행 컨트롤러가 소비하는 주문 인터페이스
//! - `ExchangeError`: 어댑터 에러 (모든 에러는 재시도 대상)
//! - `SimulatedExchange`: 드라이런용 시뮬레이션 거래소

pub mod error;
pub mod simulated;
pub mod traits;

pub use error::*;
pub use simulated::{SimulatedConfig, SimulatedExchange};
pub use traits::*;
