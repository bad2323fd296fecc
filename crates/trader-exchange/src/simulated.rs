//! 드라이런용 시뮬레이션 거래소.
//!
//! - 시장가 주문은 현재 가격에 슬리피지를 적용해 즉시 전량 체결됩니다.
//! - 지정가 주문은 대기하다가 가격이 지정가를 건너면 지정가로 체결됩니다.
//! - `fail_next`로 다음 N번의 주문 요청을 실패시킬 수 있습니다 (테스트용).

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use trader_core::{Order, OrderStatusType, Price, Quantity, Side};

use crate::traits::{ExchangeAdapter, ExchangeResult};
use crate::ExchangeError;

/// 시뮬레이션 거래소 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// 시장가 주문 슬리피지율 (0.001 = 0.1%)
    #[serde(default = "default_slippage_rate")]
    pub slippage_rate: Decimal,
    /// 주문 ID 접두사
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_slippage_rate() -> Decimal {
    dec!(0.001)
}

fn default_id_prefix() -> String {
    "sim".to_string()
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            slippage_rate: default_slippage_rate(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl SimulatedConfig {
    /// 슬리피지율을 설정합니다.
    pub fn with_slippage_rate(mut self, rate: Decimal) -> Self {
        self.slippage_rate = rate;
        self
    }
}

/// 시뮬레이션 거래소.
pub struct SimulatedExchange {
    config: SimulatedConfig,
    /// 심볼별 현재 가격
    prices: RwLock<HashMap<String, Price>>,
    /// 주문 ID → 주문
    orders: RwLock<HashMap<String, Order>>,
    order_counter: AtomicU64,
    /// 남은 강제 실패 횟수
    failures_remaining: AtomicU32,
}

impl SimulatedExchange {
    /// 새로운 시뮬레이션 거래소를 생성합니다.
    pub fn new(config: SimulatedConfig) -> Self {
        info!(slippage = %config.slippage_rate, "[DRY RUN] SimulatedExchange initialized");
        Self {
            config,
            prices: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            order_counter: AtomicU64::new(0),
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// 심볼 가격을 갱신하고, 가격을 건넌 대기 주문을 체결합니다.
    ///
    /// 체결된 주문 ID 목록을 반환합니다.
    pub async fn set_price(&self, symbol: &str, price: Price) -> Vec<String> {
        self.prices.write().await.insert(symbol.to_string(), price);
        self.try_fill_limit_orders(symbol).await
    }

    /// 현재 가격 조회.
    pub async fn price(&self, symbol: &str) -> Option<Price> {
        self.prices.read().await.get(symbol).copied()
    }

    /// 다음 `n`번의 주문 요청을 네트워크 에러로 실패시킵니다.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// 주문 스냅샷 조회.
    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.read().await.get(order_id).cloned()
    }

    /// 대기 중인 주문 수.
    pub async fn open_order_count(&self) -> usize {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.status.is_active())
            .count()
    }

    /// 심볼의 대기 주문 중 가격을 건넌 주문을 지정가로 체결합니다.
    pub async fn try_fill_limit_orders(&self, symbol: &str) -> Vec<String> {
        let Some(price) = self.price(symbol).await else {
            return Vec::new();
        };

        let mut filled = Vec::new();
        let mut orders = self.orders.write().await;
        for order in orders.values_mut() {
            if order.symbol != symbol || !order.status.is_active() {
                continue;
            }
            let Some(limit) = order.limit_price else {
                continue;
            };
            if Self::crosses(order.side, price, limit) {
                order.status = OrderStatusType::Filled;
                order.filled_quantity = order.quantity;
                order.average_fill_price = Some(limit);
                info!(order_id = %order.id, symbol, price = %limit, "[DRY RUN] Limit order filled");
                filled.push(order.id.clone());
            }
        }
        filled
    }

    /// 매도 지정가는 가격 ≥ 지정가, 매수 지정가는 가격 ≤ 지정가에서 체결.
    fn crosses(side: Side, market: Price, limit: Price) -> bool {
        match side {
            Side::Sell => market >= limit,
            Side::Buy => market <= limit,
        }
    }

    fn next_order_id(&self) -> String {
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_{}_{}", self.config.id_prefix, chrono::Utc::now().timestamp(), n)
    }

    /// 강제 실패가 남아 있으면 하나 소모하고 에러를 반환합니다.
    fn take_injected_failure(&self) -> ExchangeResult<()> {
        let consumed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(ExchangeError::NetworkError("simulated failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn validate_quantity(quantity: Quantity) -> ExchangeResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidQuantity(quantity.to_string()));
        }
        Ok(())
    }

    async fn current_price(&self, symbol: &str) -> ExchangeResult<Price> {
        self.price(symbol)
            .await
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }
}

impl Default for SimulatedExchange {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatedExchange {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
    ) -> ExchangeResult<Order> {
        self.take_injected_failure()?;
        Self::validate_quantity(quantity)?;
        let price = self.current_price(symbol).await?;

        let slip = self.config.slippage_rate;
        let fill_price = match side {
            Side::Buy => price * (Decimal::ONE + slip),
            Side::Sell => price * (Decimal::ONE - slip),
        };

        let order = Order::market(self.next_order_id(), symbol, side, quantity).filled_at(fill_price);
        self.orders.write().await.insert(order.id.clone(), order.clone());

        info!(
            order_id = %order.id,
            symbol,
            side = %side,
            quantity = %quantity,
            price = %fill_price,
            "[DRY RUN] Market order filled"
        );
        Ok(order)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> ExchangeResult<Order> {
        self.take_injected_failure()?;
        Self::validate_quantity(quantity)?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::OrderRejected(format!("invalid limit price {}", price)));
        }

        let order = Order::limit(self.next_order_id(), symbol, side, quantity, price);
        self.orders.write().await.insert(order.id.clone(), order.clone());

        info!(
            order_id = %order.id,
            symbol,
            side = %side,
            quantity = %quantity,
            limit = %price,
            "[DRY RUN] Limit order placed"
        );
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(order_id) {
            Some(order) if order.status.is_active() => {
                order.status = OrderStatusType::Cancelled;
                info!(order_id, "[DRY RUN] Order cancelled");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ExchangeError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn get_order_status(&self, order_id: &str) -> ExchangeResult<OrderStatusType> {
        let symbol = {
            let orders = self.orders.read().await;
            let order = orders
                .get(order_id)
                .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;
            if !order.status.is_active() {
                return Ok(order.status);
            }
            order.symbol.clone()
        };

        // 대기 주문은 조회 시점의 가격으로 다시 매칭
        self.try_fill_limit_orders(&symbol).await;

        let orders = self.orders.read().await;
        let status = orders
            .get(order_id)
            .map(|o| o.status)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;
        debug!(order_id, status = %status, "order status");
        Ok(status)
    }

    async fn get_position_value(&self, symbol: &str, side: Side) -> ExchangeResult<Price> {
        let price = self.current_price(symbol).await?;
        let slip = self.config.slippage_rate;
        // 청산 방향으로 거래했을 때 받는 가격
        Ok(match side {
            Side::Buy => price * (Decimal::ONE - slip),
            Side::Sell => price * (Decimal::ONE + slip),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange_with_price(price: Decimal) -> SimulatedExchange {
        let exchange = SimulatedExchange::default();
        exchange.set_price("BTC-USD", price).await;
        exchange
    }

    #[tokio::test]
    async fn test_market_order_applies_slippage() {
        let exchange = exchange_with_price(dec!(100)).await;

        let buy = exchange
            .place_market_order("BTC-USD", Side::Buy, dec!(2))
            .await
            .unwrap();
        assert_eq!(buy.status, OrderStatusType::Filled);
        assert_eq!(buy.filled_quantity, dec!(2));
        assert_eq!(buy.average_fill_price, Some(dec!(100.1)));

        let sell = exchange
            .place_market_order("BTC-USD", Side::Sell, dec!(2))
            .await
            .unwrap();
        assert_eq!(sell.average_fill_price, Some(dec!(99.9)));
    }

    #[tokio::test]
    async fn test_unknown_symbol_fails() {
        let exchange = SimulatedExchange::default();
        let result = exchange.place_market_order("NOPE", Side::Buy, dec!(1)).await;
        assert!(matches!(result, Err(ExchangeError::SymbolNotFound(_))));
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_crossed() {
        let exchange = exchange_with_price(dec!(100)).await;

        let order = exchange
            .place_limit_order("BTC-USD", Side::Sell, dec!(1), dec!(105))
            .await
            .unwrap();
        assert_eq!(
            exchange.get_order_status(&order.id).await.unwrap(),
            OrderStatusType::Open
        );
        assert_eq!(exchange.open_order_count().await, 1);

        let filled = exchange.set_price("BTC-USD", dec!(106)).await;
        assert_eq!(filled, vec![order.id.clone()]);

        let snapshot = exchange.order(&order.id).await.unwrap();
        assert_eq!(snapshot.status, OrderStatusType::Filled);
        assert_eq!(snapshot.average_fill_price, Some(dec!(105)));
    }

    #[tokio::test]
    async fn test_buy_limit_fills_on_drop() {
        let exchange = SimulatedExchange::default();
        exchange.set_price("YES-1", dec!(0.60)).await;

        let order = exchange
            .place_limit_order("YES-1", Side::Buy, dec!(10), dec!(0.55))
            .await
            .unwrap();
        assert!(exchange.set_price("YES-1", dec!(0.56)).await.is_empty());

        let filled = exchange.set_price("YES-1", dec!(0.54)).await;
        assert_eq!(filled.len(), 1);
        let snapshot = exchange.order(&order.id).await.unwrap();
        assert_eq!(snapshot.average_fill_price, Some(dec!(0.55)));
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let exchange = exchange_with_price(dec!(100)).await;
        let order = exchange
            .place_limit_order("BTC-USD", Side::Buy, dec!(1), dec!(90))
            .await
            .unwrap();

        assert!(exchange.cancel_order(&order.id).await.unwrap());
        // 이미 취소된 주문은 false
        assert!(!exchange.cancel_order(&order.id).await.unwrap());
        assert!(exchange.cancel_order("missing").await.is_err());

        // 취소된 주문은 가격이 건너도 체결되지 않음
        exchange.set_price("BTC-USD", dec!(80)).await;
        assert_eq!(
            exchange.get_order_status(&order.id).await.unwrap(),
            OrderStatusType::Cancelled
        );
    }

    #[tokio::test]
    async fn test_fail_next_injects_errors() {
        let exchange = exchange_with_price(dec!(100)).await;
        exchange.fail_next(2);

        assert!(exchange.place_market_order("BTC-USD", Side::Buy, dec!(1)).await.is_err());
        assert!(exchange.place_market_order("BTC-USD", Side::Buy, dec!(1)).await.is_err());
        assert!(exchange.place_market_order("BTC-USD", Side::Buy, dec!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_position_value_uses_exit_side_price() {
        let exchange = exchange_with_price(dec!(100)).await;
        assert_eq!(
            exchange.get_position_value("BTC-USD", Side::Buy).await.unwrap(),
            dec!(99.9)
        );
        assert_eq!(
            exchange.get_position_value("BTC-USD", Side::Sell).await.unwrap(),
            dec!(100.1)
        );
    }
}
