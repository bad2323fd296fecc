//! 추가 전용 거래 원장.
//!
//! 한 줄에 [`TradeRecord`] 하나를 JSON으로 기록합니다 (NDJSON). 기존 줄은
//! 다시 쓰지 않으며, 파일이 없으면 빈 원장으로 읽힙니다.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use trader_core::{Amount, RecordKind, TradeRecord, TraderError};

/// 원장 에러.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LedgerError> for TraderError {
    fn from(err: LedgerError) -> Self {
        TraderError::Ledger(err.to_string())
    }
}

/// 원장 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub entries: usize,
    pub exits: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: Amount,
    pub total_fees: Amount,
}

/// NDJSON 거래 원장.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// 원장을 엽니다. 상위 디렉토리가 없으면 만듭니다.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    /// 원장 파일 경로.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 레코드 한 줄을 추가합니다.
    pub fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        debug!(
            market_id = %record.market_id,
            kind = ?record.kind,
            pnl = ?record.pnl,
            "원장 기록"
        );
        Ok(())
    }

    /// 모든 레코드를 읽습니다. 파싱할 수 없는 줄은 경고 후 건너뜁니다.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = index + 1, error = %e, "원장 줄 파싱 실패, 건너뜀"),
            }
        }
        Ok(records)
    }

    /// 지정 시각 이후 청산 레코드의 손익 합계.
    pub fn pnl_since(&self, since: DateTime<Utc>) -> Result<Amount, LedgerError> {
        Ok(self
            .read_all()?
            .iter()
            .filter(|r| r.timestamp >= since)
            .filter_map(|r| r.pnl)
            .sum())
    }

    /// 지정 UTC 날짜의 손익 합계.
    pub fn pnl_on(&self, date: NaiveDate) -> Result<Amount, LedgerError> {
        Ok(self
            .read_all()?
            .iter()
            .filter(|r| r.timestamp.date_naive() == date)
            .filter_map(|r| r.pnl)
            .sum())
    }

    /// 오늘(UTC) 손익 합계.
    pub fn today_pnl(&self) -> Result<Amount, LedgerError> {
        self.pnl_on(Utc::now().date_naive())
    }

    /// 최근 청산 레코드 `n`개 (최신순).
    pub fn recent_closed(&self, n: usize) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .filter(TradeRecord::is_closed)
            .take(n)
            .collect())
    }

    /// 원장 전체 요약.
    pub fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let records = self.read_all()?;

        let entries = records.iter().filter(|r| r.kind == RecordKind::Entry).count();
        let closed: Vec<Amount> = records.iter().filter_map(|r| r.pnl).collect();
        let wins = closed.iter().filter(|pnl| **pnl > Decimal::ZERO).count();
        let exits = closed.len();

        Ok(LedgerSummary {
            entries,
            exits,
            wins,
            losses: exits - wins,
            win_rate: if exits == 0 { 0.0 } else { wins as f64 / exits as f64 },
            total_pnl: closed.iter().copied().sum(),
            total_fees: records.iter().map(|r| r.fee).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use trader_core::Side;

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("data").join("trades.jsonl")).unwrap();
        (dir, ledger)
    }

    fn entry(market: &str, fee: Decimal) -> TradeRecord {
        TradeRecord::entry(market, Side::Buy, dec!(0.55), dec!(10), fee, "test", "signal", "o1")
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_dir, ledger) = ledger();
        assert!(ledger.read_all().unwrap().is_empty());
        assert_eq!(ledger.today_pnl().unwrap(), Decimal::ZERO);
        assert_eq!(ledger.summary().unwrap().exits, 0);
    }

    #[test]
    fn test_append_preserves_existing_lines() {
        let (_dir, ledger) = ledger();
        ledger.append(&entry("A", dec!(0.01))).unwrap();
        let first = std::fs::read_to_string(ledger.path()).unwrap();

        ledger.append(&entry("A", dec!(0.01)).into_exit(dec!(1.5))).unwrap();
        let both = std::fs::read_to_string(ledger.path()).unwrap();

        assert!(both.starts_with(&first));
        assert_eq!(both.lines().count(), 2);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let (_dir, ledger) = ledger();
        ledger.append(&entry("A", dec!(0))).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(ledger.path()).unwrap();
            writeln!(file, "{{not json").unwrap();
            writeln!(file).unwrap();
        }
        ledger.append(&entry("B", dec!(0)).into_exit(dec!(-2))).unwrap();

        let records = ledger.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].market_id, "B");
    }

    #[test]
    fn test_pnl_queries() {
        let (_dir, ledger) = ledger();
        let day1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let day2 = day1 + Duration::days(1);

        ledger.append(&entry("A", dec!(0.01)).at(day1)).unwrap();
        ledger.append(&entry("A", dec!(0.01)).into_exit(dec!(3)).at(day1)).unwrap();
        ledger.append(&entry("B", dec!(0.01)).into_exit(dec!(-1.25)).at(day2)).unwrap();
        ledger.append(&entry("C", dec!(0.01)).into_exit(dec!(0.5)).at(day2)).unwrap();

        assert_eq!(ledger.pnl_on(day1.date_naive()).unwrap(), dec!(3));
        assert_eq!(ledger.pnl_on(day2.date_naive()).unwrap(), dec!(-0.75));
        assert_eq!(ledger.pnl_since(day2).unwrap(), dec!(-0.75));

        let recent = ledger.recent_closed(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].market_id, "C");
        assert_eq!(recent[1].market_id, "B");
    }

    #[test]
    fn test_summary() {
        let (_dir, ledger) = ledger();
        ledger.append(&entry("A", dec!(0.01))).unwrap();
        ledger.append(&entry("A", dec!(0.02)).into_exit(dec!(2))).unwrap();
        ledger.append(&entry("B", dec!(0.01))).unwrap();
        ledger.append(&entry("B", dec!(0.02)).into_exit(dec!(-1))).unwrap();

        let summary = ledger.summary().unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.exits, 2);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.win_rate, 0.5);
        assert_eq!(summary.total_pnl, dec!(1));
        assert_eq!(summary.total_fees, dec!(0.06));
    }
}
