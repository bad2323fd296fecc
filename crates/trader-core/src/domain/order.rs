//! 주문 타입.
//!
//! - `Side` - 주문 방향 (매수/매도)
//! - `OrderType` - 시장가/지정가
//! - `OrderStatusType` - 주문 상태
//! - `Order` - 거래소 어댑터가 돌려주는 일시적인 주문 엔티티

use crate::types::{Amount, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 주문 방향.
///
/// 예측 시장에서는 YES 매수가 `Buy`(롱), NO 쪽이 `Sell`(숏)에 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수 (롱)
    Buy,
    /// 매도 (숏)
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// 롱 방향 여부.
    pub fn is_long(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 시장가 주문 (테이커)
    Market,
    /// 지정가 주문 (메이커로 대기)
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// 주문 상태 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// 제출됨, 아직 체결 없음
    Pending,
    /// 호가창에 대기 중
    Open,
    /// 부분 체결
    PartiallyFilled,
    /// 전량 체결
    Filled,
    /// 취소됨
    Cancelled,
    /// 거래소에서 거부됨
    Rejected,
    /// 유효 기간 만료
    Expired,
}

impl OrderStatusType {
    /// 더 이상 바뀌지 않는 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatusType::Filled
                | OrderStatusType::Cancelled
                | OrderStatusType::Rejected
                | OrderStatusType::Expired
        )
    }

    /// 아직 호가창에 살아있는 상태인지 확인합니다.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatusType::Pending | OrderStatusType::Open | OrderStatusType::PartiallyFilled
        )
    }

    /// 체결 수량이 하나라도 있는 상태인지 확인합니다.
    pub fn has_fill(&self) -> bool {
        matches!(self, OrderStatusType::Filled | OrderStatusType::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatusType::Pending => "pending",
            OrderStatusType::Open => "open",
            OrderStatusType::PartiallyFilled => "partially_filled",
            OrderStatusType::Filled => "filled",
            OrderStatusType::Cancelled => "cancelled",
            OrderStatusType::Rejected => "rejected",
            OrderStatusType::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// 거래소 어댑터가 반환하는 주문.
///
/// 실행 컨트롤러가 정산하거나 취소할 때까지만 존재합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// 거래소 주문 ID
    pub id: String,
    /// 심볼 (시장 ID)
    pub symbol: String,
    /// 방향
    pub side: Side,
    /// 유형
    pub order_type: OrderType,
    /// 요청 수량
    pub quantity: Quantity,
    /// 지정가 (시장가 주문이면 None)
    pub limit_price: Option<Price>,
    /// 상태
    pub status: OrderStatusType,
    /// 체결 수량
    pub filled_quantity: Quantity,
    /// 평균 체결 가격
    pub average_fill_price: Option<Price>,
    /// 거래소가 보고한 수수료 (없으면 0)
    pub fee: Amount,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// 제출 직후 상태의 시장가 주문을 생성합니다.
    pub fn market(id: impl Into<String>, symbol: impl Into<String>, side: Side, quantity: Quantity) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            status: OrderStatusType::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            fee: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    /// 호가창에 올라간 지정가 주문을 생성합니다.
    pub fn limit(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(price),
            status: OrderStatusType::Open,
            ..Self::market(id, symbol, side, quantity)
        }
    }

    /// 전량 체결로 표시합니다.
    pub fn filled_at(mut self, price: Price) -> Self {
        self.status = OrderStatusType::Filled;
        self.filled_quantity = self.quantity;
        self.average_fill_price = Some(price);
        self
    }

    /// 상태를 지정합니다.
    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.status = status;
        self
    }

    /// 체결된 수량이 있는지 확인합니다.
    pub fn is_filled(&self) -> bool {
        self.status.has_fill() && self.filled_quantity > Decimal::ZERO
    }

    /// 체결 명목 금액 (체결가 × 체결 수량).
    pub fn filled_notional(&self) -> Amount {
        self.average_fill_price
            .map(|p| p * self.filled_quantity)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert!(Side::Buy.is_long());
    }

    #[test]
    fn test_order_status_flags() {
        assert!(OrderStatusType::Filled.is_final());
        assert!(OrderStatusType::Open.is_active());
        assert!(OrderStatusType::PartiallyFilled.has_fill());
        assert!(!OrderStatusType::Cancelled.has_fill());
    }

    #[test]
    fn test_limit_order_starts_open() {
        let order = Order::limit("o-1", "BTC-USD", Side::Sell, dec!(2), dec!(101));
        assert_eq!(order.status, OrderStatusType::Open);
        assert_eq!(order.limit_price, Some(dec!(101)));
        assert!(!order.is_filled());
    }

    #[test]
    fn test_filled_notional() {
        let order = Order::market("o-2", "BTC-USD", Side::Buy, dec!(3)).filled_at(dec!(10.5));
        assert!(order.is_filled());
        assert_eq!(order.filled_notional(), dec!(31.5));
    }

    #[test]
    fn test_zero_quantity_fill_is_not_filled() {
        let order = Order::market("o-3", "X", Side::Buy, dec!(0)).filled_at(dec!(1));
        assert!(!order.is_filled());
    }
}
