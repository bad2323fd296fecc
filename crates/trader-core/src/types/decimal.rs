//! 금액 계산용 Decimal 타입과 변환 유틸리티.
//!
//! 가격, 수량, 잔고, 손익, 수수료는 모두 `Decimal`로 다룹니다. 확률,
//! 비율, 독성 점수처럼 통계적인 값은 `f64`로 다루며, 두 세계 사이의
//! 변환은 이 모듈의 함수만 사용합니다.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// 가격 타입.
pub type Price = Decimal;

/// 수량 타입.
pub type Quantity = Decimal;

/// 잔고, 손익, 수수료 같은 금액 타입.
pub type Amount = Decimal;

/// 금액 표시용 소수점 자릿수.
pub const MONEY_DP: u32 = 2;

/// Decimal 확장 트레이트.
pub trait DecimalExt {
    /// f64로 변환합니다. 표현할 수 없으면 0.0.
    fn to_f64_lossy(&self) -> f64;

    /// 지정 자릿수에서 반올림합니다 (0.5는 0에서 멀어지는 방향).
    fn round_half_away(&self, dp: u32) -> Decimal;
}

impl DecimalExt for Decimal {
    fn to_f64_lossy(&self) -> f64 {
        self.to_f64().unwrap_or(0.0)
    }

    fn round_half_away(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// f64를 Decimal로 변환하고 `dp` 자리에서 반올림합니다.
///
/// NaN과 무한대는 0을 반환합니다.
pub fn decimal_from_f64(value: f64, dp: u32) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_half_away(dp))
        .unwrap_or(Decimal::ZERO)
}
