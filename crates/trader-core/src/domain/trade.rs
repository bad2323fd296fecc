//! 원장에 기록되는 불변 거래 레코드.
//!
//! 왕복 거래 하나는 진입 레코드(`pnl` 없음)와 청산 레코드(`pnl` 있음)
//! 두 줄을 남깁니다.

use crate::domain::Side;
use crate::types::{Amount, Price, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 레코드 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// 포지션 진입
    Entry,
    /// 포지션 청산
    Exit,
}

/// 원장 한 줄.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// 기록 시각
    pub timestamp: DateTime<Utc>,
    /// 시장 ID (심볼)
    pub market_id: String,
    /// 진입/청산 구분
    #[serde(default = "default_kind")]
    pub kind: RecordKind,
    /// 체결 방향
    pub side: Side,
    /// 체결 가격
    pub price: Price,
    /// 체결 수량
    pub size: Quantity,
    /// 이 체결의 수수료
    pub fee: Amount,
    /// 전략 태그
    pub strategy: String,
    /// 사유 (진입 신호, 손절, 익절 등)
    #[serde(default)]
    pub reason: String,
    /// 실현 손익. 진입 레코드는 None.
    pub pnl: Option<Amount>,
    /// 모의 실행 여부
    #[serde(default)]
    pub dry_run: bool,
    /// 거래소 주문 ID
    #[serde(default)]
    pub order_id: String,
}

fn default_kind() -> RecordKind {
    RecordKind::Entry
}

impl TradeRecord {
    /// 진입 레코드 생성.
    #[allow(clippy::too_many_arguments)]
    pub fn entry(
        market_id: impl Into<String>,
        side: Side,
        price: Price,
        size: Quantity,
        fee: Amount,
        strategy: impl Into<String>,
        reason: impl Into<String>,
        order_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            market_id: market_id.into(),
            kind: RecordKind::Entry,
            side,
            price,
            size,
            fee,
            strategy: strategy.into(),
            reason: reason.into(),
            pnl: None,
            dry_run: false,
            order_id: order_id.into(),
        }
    }

    /// 청산 레코드로 변환합니다.
    pub fn into_exit(mut self, pnl: Amount) -> Self {
        self.kind = RecordKind::Exit;
        self.pnl = Some(pnl);
        self
    }

    /// 모의 실행 표시.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// 기록 시각 지정.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 청산 레코드인지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.pnl.is_some()
    }
}
