//! 오픈 포지션.
//!
//! 심볼당 하나만 존재하며 리스크 엔진의 포지션 맵이 소유합니다. 진입 체결로
//! 생성되고 청산 시 `pnl`이 채워진 뒤 맵에서 제거됩니다.

use crate::domain::Side;
use crate::types::{Amount, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 오픈 포지션.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 심볼 (시장 ID)
    pub symbol: String,
    /// 방향 (롱 = Buy, 숏 = Sell)
    pub side: Side,
    /// 진입 가격
    pub entry_price: Price,
    /// 수량
    pub quantity: Quantity,
    /// 진입 시각
    pub entry_time: DateTime<Utc>,
    /// 손절 가격
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    /// 포지션을 연 전략 태그
    pub strategy: String,
    /// 카피 트레이딩 리더 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    /// 진입 시 지불한 수수료. 청산 손익에 함께 반영됩니다.
    #[serde(default)]
    pub entry_fee: Amount,
    /// 실현 손익 (청산 시 설정)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<Amount>,
}

impl Position {
    /// 새 포지션을 생성합니다.
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        entry_price: Price,
        quantity: Quantity,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            entry_time: Utc::now(),
            stop_price: None,
            strategy: strategy.into(),
            leader: None,
            entry_fee: Decimal::ZERO,
            pnl: None,
        }
    }

    /// 손절 가격 설정.
    pub fn with_stop(mut self, stop_price: Price) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    /// 리더 ID 설정.
    pub fn with_leader(mut self, leader: impl Into<String>) -> Self {
        self.leader = Some(leader.into());
        self
    }

    /// 진입 수수료 설정.
    pub fn with_entry_fee(mut self, fee: Amount) -> Self {
        self.entry_fee = fee;
        self
    }

    /// 진입 시각 설정.
    pub fn with_entry_time(mut self, entry_time: DateTime<Utc>) -> Self {
        self.entry_time = entry_time;
        self
    }

    /// 진입 명목 금액.
    pub fn notional(&self) -> Amount {
        self.entry_price * self.quantity
    }

    /// 주어진 가격에서 수수료를 뺀 손익.
    ///
    /// 롱: `(exit − entry) × qty − fee`, 숏: `(entry − exit) × qty − fee`
    pub fn pnl_at(&self, exit_price: Price, fee: Amount) -> Amount {
        let gross = match self.side {
            Side::Buy => (exit_price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - exit_price) * self.quantity,
        };
        gross - fee
    }

    /// 손절 가격에 도달했는지 확인합니다.
    pub fn stop_hit(&self, price: Price) -> bool {
        match (self.stop_price, self.side) {
            (Some(stop), Side::Buy) => price <= stop,
            (Some(stop), Side::Sell) => price >= stop,
            (None, _) => false,
        }
    }
}
