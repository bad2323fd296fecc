//! 실행 엔진 설정.
//!
//! 실행 파라미터(재시도, 수수료), 전략 프로파일, 세션 루프 설정과 이를 묶는
//! [`EngineConfig`]를 정의합니다. `EngineConfig`는 TOML 파일 위에
//! `TRADER__` 환경 변수를 겹쳐서 로드합니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use trader_core::{
    init_logging, load_config, LogConfig, TraderError, TraderResult, DEFAULT_ENV_PREFIX,
};
use trader_exchange::SimulatedConfig;
use trader_risk::{ConfigValidationError, KellyConfig, MonitorConfig, RiskConfig, VpinConfig};

// ==================== Execution ====================

/// 주문 실행 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// 주문당 최대 시도 횟수 (기본값: 3)
    #[serde(default = "default_max_order_retries")]
    pub max_order_retries: u32,

    /// 시도 사이 대기 시간 (밀리초, 기본값: 500)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// 테이커 수수료율 (기본값: 0.001)
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,

    /// 메이커 수수료율, 음수면 리베이트 (기본값: -0.0002)
    #[serde(default = "default_maker_fee_rate")]
    pub maker_fee_rate: Decimal,

    /// 모의 실행 여부 (원장 레코드에 표시)
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    /// VPIN `withdraw` 신호에서 신규 진입 거부 (기본값: true)
    #[serde(default = "default_deny_on_withdraw")]
    pub deny_on_withdraw: bool,

    /// 주문 수량 소수점 자릿수 (기본값: 4)
    #[serde(default = "default_quantity_dp")]
    pub quantity_dp: u32,
}

fn default_max_order_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_taker_fee_rate() -> Decimal {
    dec!(0.001)
}

fn default_maker_fee_rate() -> Decimal {
    dec!(-0.0002)
}

fn default_dry_run() -> bool {
    true
}

fn default_deny_on_withdraw() -> bool {
    true
}

fn default_quantity_dp() -> u32 {
    4
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_order_retries: default_max_order_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            taker_fee_rate: default_taker_fee_rate(),
            maker_fee_rate: default_maker_fee_rate(),
            dry_run: default_dry_run(),
            deny_on_withdraw: default_deny_on_withdraw(),
            quantity_dp: default_quantity_dp(),
        }
    }
}

impl ExecutionConfig {
    /// 시도 사이 대기 시간.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_order_retries == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_order_retries must be at least 1".into(),
            ));
        }

        if self.taker_fee_rate < Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "taker_fee_rate must not be negative".into(),
            ));
        }

        if self.maker_fee_rate.abs() >= Decimal::ONE {
            return Err(ConfigValidationError::InvalidValue(
                "maker_fee_rate must be within (-1, 1)".into(),
            ));
        }

        Ok(())
    }
}

// ==================== Strategy Profile ====================

/// 진입 주문 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStyle {
    /// 시장가 즉시 체결
    #[default]
    Aggressive,
    /// 지정가 대기
    Passive,
}

/// 전략별 실행 특성.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProfile {
    /// 원장과 포지션에 기록되는 전략 태그
    #[serde(default = "default_strategy_tag")]
    pub tag: String,

    /// 메이커(지정가) 청산 지원 여부
    #[serde(default)]
    pub supports_maker_exit: bool,

    /// 기본 진입 방식
    #[serde(default)]
    pub entry_style: EntryStyle,
}

fn default_strategy_tag() -> String {
    "default".to_string()
}

impl Default for StrategyProfile {
    fn default() -> Self {
        Self {
            tag: default_strategy_tag(),
            supports_maker_exit: false,
            entry_style: EntryStyle::default(),
        }
    }
}

impl StrategyProfile {
    /// 태그로 프로파일 생성.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// 메이커 청산 지원 설정.
    pub fn with_maker_exit(mut self, enabled: bool) -> Self {
        self.supports_maker_exit = enabled;
        self
    }

    /// 진입 방식 설정.
    pub fn with_entry_style(mut self, style: EntryStyle) -> Self {
        self.entry_style = style;
        self
    }
}

// ==================== Session ====================

/// 세션 루프 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 사이클 간격 (밀리초, 기본값: 1000)
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// 거래 중지 시 루프 종료 (기본값: true)
    #[serde(default = "default_stop_on_halt")]
    pub stop_on_halt: bool,

    /// 최대 사이클 수 (없으면 무제한)
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

fn default_cycle_interval_ms() -> u64 {
    1000
}

fn default_stop_on_halt() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            stop_on_halt: default_stop_on_halt(),
            max_cycles: None,
        }
    }
}

impl SessionConfig {
    /// 사이클 간격.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms.max(1))
    }
}

// ==================== Engine ====================

/// 전체 엔진 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub kelly: KellyConfig,
    #[serde(default)]
    pub vpin: VpinConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub strategy: StrategyProfile,
    #[serde(default)]
    pub simulated: SimulatedConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// 원장 파일 경로 (기본값: data/trades.jsonl)
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/trades.jsonl")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logging: LogConfig::default(),
            risk: RiskConfig::default(),
            kelly: KellyConfig::default(),
            vpin: VpinConfig::default(),
            monitor: MonitorConfig::default(),
            execution: ExecutionConfig::default(),
            strategy: StrategyProfile::default(),
            simulated: SimulatedConfig::default(),
            session: SessionConfig::default(),
            ledger_path: default_ledger_path(),
        }
    }
}

impl EngineConfig {
    /// 파일과 `TRADER__` 환경 변수에서 설정을 로드하고 검증합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> TraderResult<Self> {
        let config: Self = load_config(path, DEFAULT_ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// `[logging]` 섹션에 환경 변수를 겹쳐 전역 로거를 설치합니다.
    pub fn init_logging(&self) -> TraderResult<()> {
        init_logging(self.logging.clone().apply_env())
            .map_err(|e| TraderError::Config(format!("[logging] {}", e)))
    }

    /// 모든 섹션을 검증합니다.
    pub fn validate(&self) -> TraderResult<()> {
        let to_config_error = |section: &str, e: ConfigValidationError| {
            TraderError::Config(format!("[{}] {}", section, e))
        };

        self.risk.validate().map_err(|e| to_config_error("risk", e))?;
        self.kelly.validate().map_err(|e| to_config_error("kelly", e))?;
        self.vpin.validate().map_err(|e| to_config_error("vpin", e))?;
        self.execution
            .validate()
            .map_err(|e| to_config_error("execution", e))?;

        if self.strategy.tag.trim().is_empty() {
            return Err(TraderError::Config("[strategy] tag must not be empty".into()));
        }

        Ok(())
    }
}
