//! 거래소 어댑터 trait 정의.

use async_trait::async_trait;
use trader_core::{Order, OrderStatusType, Price, Quantity, Side};

use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 실행 컨트롤러가 사용하는 주문 인터페이스.
///
/// 실제 거래소 클라이언트(REST/WebSocket, 서명)는 이 trait 뒤에 숨겨집니다.
/// 어떤 에러든 호출자 입장에서는 실패한 시도 한 번이며 재시도 대상입니다.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// 어댑터 이름 반환.
    fn name(&self) -> &str;

    /// 시장가 주문. 체결 결과가 반영된 주문을 반환합니다.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
    ) -> ExchangeResult<Order>;

    /// 지정가 주문. 체결 전까지 `Open` 상태로 대기합니다.
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> ExchangeResult<Order>;

    /// 대기 중인 주문 취소. 취소된 경우 true.
    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<bool>;

    /// 주문 상태 조회.
    async fn get_order_status(&self, order_id: &str) -> ExchangeResult<OrderStatusType>;

    /// 심볼/방향의 현재 평가 가격 조회.
    async fn get_position_value(&self, symbol: &str, side: Side) -> ExchangeResult<Price>;
}
