//! 대기 주문 관리.
//!
//! 호가창에 올라간 지정가 주문(패시브 진입, 메이커 청산)을 체결이나 취소될 때까지
//! 추적합니다. 심볼당 대기 주문은 하나만 허용됩니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use trader_core::{Order, OrderStatusType, Price};
use trader_risk::KellySizing;

/// 주문 관리자 오류.
#[derive(Debug, Error)]
pub enum OrderManagerError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Symbol {symbol} already has resting order {order_id}")]
    SymbolBusy { symbol: String, order_id: String },
}

/// 대기 진입 주문이 체결되면 포지션에 반영할 정보.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub stop_price: Option<Price>,
    pub leader: Option<String>,
    pub sizing: Option<KellySizing>,
}

/// 대기 주문의 목적.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPurpose {
    /// 패시브 진입
    Entry(PendingEntry),
    /// 메이커 청산
    Exit,
}

impl OrderPurpose {
    /// 진입 주문인지 확인.
    pub fn is_entry(&self) -> bool {
        matches!(self, OrderPurpose::Entry(_))
    }
}

/// 추적 중인 대기 주문.
#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub order: Order,
    pub purpose: OrderPurpose,
    pub reason: String,
    pub placed_at: DateTime<Utc>,
}

impl RestingOrder {
    /// 지정가 (없으면 주문의 평균 체결가).
    pub fn price(&self) -> Option<Price> {
        self.order.limit_price.or(self.order.average_fill_price)
    }
}

/// 주문 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// 대기 주문 등록
    Placed {
        order_id: String,
        symbol: String,
        entry: bool,
        timestamp: DateTime<Utc>,
    },
    /// 대기 주문 종료 (체결, 취소, 거부, 만료)
    Completed {
        order_id: String,
        status: OrderStatusType,
        timestamp: DateTime<Utc>,
    },
}

/// 대기 주문 관리자.
#[derive(Debug)]
pub struct OrderManager {
    /// 주문 ID → 대기 주문
    resting: HashMap<String, RestingOrder>,
    /// 심볼 → 주문 ID
    by_symbol: HashMap<String, String>,
    /// 주문 이벤트 이력
    events: Vec<OrderEvent>,
    /// 최대 이력 크기
    max_history_size: usize,
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderManager {
    /// 새로운 주문 관리자를 생성한다.
    pub fn new() -> Self {
        Self {
            resting: HashMap::new(),
            by_symbol: HashMap::new(),
            events: Vec::new(),
            max_history_size: 1000,
        }
    }

    /// 사용자 정의 이력 크기로 생성한다.
    pub fn with_history_size(max_history_size: usize) -> Self {
        Self {
            max_history_size,
            ..Self::new()
        }
    }

    /// 대기 주문을 추적에 추가한다.
    pub fn track(
        &mut self,
        order: Order,
        purpose: OrderPurpose,
        reason: impl Into<String>,
    ) -> Result<(), OrderManagerError> {
        if let Some(existing) = self.by_symbol.get(&order.symbol) {
            return Err(OrderManagerError::SymbolBusy {
                symbol: order.symbol.clone(),
                order_id: existing.clone(),
            });
        }

        let now = Utc::now();
        self.record_event(OrderEvent::Placed {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            entry: purpose.is_entry(),
            timestamp: now,
        });
        debug!(order_id = %order.id, symbol = %order.symbol, entry = purpose.is_entry(), "대기 주문 추적");

        self.by_symbol.insert(order.symbol.clone(), order.id.clone());
        self.resting.insert(
            order.id.clone(),
            RestingOrder {
                order,
                purpose,
                reason: reason.into(),
                placed_at: now,
            },
        );
        Ok(())
    }

    /// 대기 주문을 종료 처리하고 추적에서 제거한다.
    pub fn complete(
        &mut self,
        order_id: &str,
        status: OrderStatusType,
    ) -> Result<RestingOrder, OrderManagerError> {
        let mut resting = self
            .resting
            .remove(order_id)
            .ok_or_else(|| OrderManagerError::OrderNotFound(order_id.to_string()))?;
        self.by_symbol.remove(&resting.order.symbol);

        resting.order.status = status;
        self.record_event(OrderEvent::Completed {
            order_id: order_id.to_string(),
            status,
            timestamp: Utc::now(),
        });
        Ok(resting)
    }

    /// ID로 대기 주문 조회.
    pub fn get(&self, order_id: &str) -> Option<&RestingOrder> {
        self.resting.get(order_id)
    }

    /// 심볼의 대기 주문 조회.
    pub fn for_symbol(&self, symbol: &str) -> Option<&RestingOrder> {
        self.by_symbol.get(symbol).and_then(|id| self.resting.get(id))
    }

    /// 심볼에 대기 진입 주문이 있는지 확인.
    pub fn has_resting_entry(&self, symbol: &str) -> bool {
        self.for_symbol(symbol)
            .map(|r| r.purpose.is_entry())
            .unwrap_or(false)
    }

    /// 심볼에 대기 청산 주문이 있는지 확인.
    pub fn has_resting_exit(&self, symbol: &str) -> bool {
        self.for_symbol(symbol)
            .map(|r| !r.purpose.is_entry())
            .unwrap_or(false)
    }

    /// 대기 주문 ID 목록 (등록 순).
    pub fn resting_ids(&self) -> Vec<String> {
        let mut resting: Vec<&RestingOrder> = self.resting.values().collect();
        resting.sort_by_key(|r| r.placed_at);
        resting.into_iter().map(|r| r.order.id.clone()).collect()
    }

    /// 대기 주문 수.
    pub fn len(&self) -> usize {
        self.resting.len()
    }

    /// 대기 주문이 없는지 확인.
    pub fn is_empty(&self) -> bool {
        self.resting.is_empty()
    }

    /// 이벤트 이력.
    pub fn events(&self) -> &[OrderEvent] {
        &self.events
    }

    fn record_event(&mut self, event: OrderEvent) {
        self.events.push(event);
        if self.events.len() > self.max_history_size {
            let excess = self.events.len() - self.max_history_size;
            self.events.drain(0..excess);
        }
    }
}
