//! 실행 코어의 공통 에러 타입.
//!
//! 리스크 거부는 에러가 아니라 데이터로 다룹니다. 여기의 에러는
//! 설정, 입출력, 직렬화처럼 호출자가 처리해야 하는 실패만 표현합니다.

use thiserror::Error;

/// 핵심 트레이딩 에러.
#[derive(Debug, Error)]
pub enum TraderError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 거래소 어댑터 에러
    #[error("거래소 에러: {0}")]
    Exchange(String),

    /// 주문 에러
    #[error("주문 에러: {0}")]
    Order(String),

    /// 포지션 에러
    #[error("포지션 에러: {0}")]
    Position(String),

    /// 원장 입출력 에러
    #[error("원장 에러: {0}")]
    Ledger(String),

    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 요청 한도 초과
    #[error("요청 한도 초과: {0}")]
    RateLimit(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 트레이딩 작업을 위한 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TraderError::Network(_) | TraderError::RateLimit(_) | TraderError::Exchange(_)
        )
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TraderError {
    fn from(err: std::io::Error) -> Self {
        TraderError::Ledger(err.to_string())
    }
}

impl From<config::ConfigError> for TraderError {
    fn from(err: config::ConfigError) -> Self {
        TraderError::Config(err.to_string())
    }
}
