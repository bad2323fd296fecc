//! 거래소 어댑터 에러 타입.

use thiserror::Error;
use trader_core::TraderError;

/// 주문 제출/조회 실패.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 연결 끊김, 응답 없음 등 전송 단계 실패
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// 0 이하이거나 최소 단위 미만인 수량
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 시세가 한 번도 들어오지 않은 심볼
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// 거래소가 주문 자체를 거부 (가격 범위 밖 등)
    #[error("Order rejected: {0}")]
    OrderRejected(String),
}

impl ExchangeError {
    /// 같은 요청을 잠시 후 다시 보내면 성공할 수 있는지.
    ///
    /// 실행 컨트롤러는 시도 횟수 안에서 모든 에러를 재시도하고, 이 값은
    /// 로그 필드로만 남깁니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::RateLimited)
    }
}

impl From<ExchangeError> for TraderError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::NetworkError(msg) => TraderError::Network(msg),
            ExchangeError::RateLimited => TraderError::RateLimit("exchange".to_string()),
            other => TraderError::Exchange(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(ExchangeError::NetworkError("reset".into()).is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
        assert!(!ExchangeError::OrderRejected("price 1.2".into()).is_retryable());
        assert!(!ExchangeError::SymbolNotFound("X".into()).is_retryable());
    }

    #[test]
    fn test_into_trader_error() {
        let err: TraderError = ExchangeError::RateLimited.into();
        assert!(err.is_retryable());

        let err: TraderError = ExchangeError::NetworkError("reset".into()).into();
        assert!(matches!(err, TraderError::Network(_)));

        let err: TraderError = ExchangeError::SymbolNotFound("X".into()).into();
        assert!(matches!(err, TraderError::Exchange(_)));
    }
}
