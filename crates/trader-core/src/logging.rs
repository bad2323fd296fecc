//! tracing 기반 로깅 초기화.
//!
//! 출력 형식은 세 가지입니다:
//! - **pretty**: 개발용 여러 줄 형식
//! - **json**: 로그 수집기용 JSON 형식
//! - **compact**: 한 줄 형식
//!
//! 엔진 설정 파일의 `[logging]` 섹션으로 구성하거나, `RUST_LOG` / `LOG_FORMAT`
//! 환경 변수로 덮어쓸 수 있습니다.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 사람이 읽기 쉬운 형식
    #[default]
    Pretty,
    /// JSON 형식
    Json,
    /// 간결한 한 줄 형식
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 필터 지시문 (예: "info", "trader_risk=debug")
    #[serde(default = "default_level")]
    pub level: String,
    /// 출력 형식
    #[serde(default)]
    pub format: LogFormat,
    /// span 진입/종료 이벤트 출력
    #[serde(default)]
    pub with_span_events: bool,
    /// 파일명과 줄 번호 출력
    #[serde(default = "default_true")]
    pub with_file: bool,
    /// 모듈 경로 출력
    #[serde(default = "default_true")]
    pub with_target: bool,
    /// 외부 crate 로그 레벨. `level`이 단일 레벨일 때만 덧붙습니다.
    #[serde(default = "default_dependency_level")]
    pub dependency_level: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_dependency_level() -> String {
    "warn".to_string()
}

/// 실행 엔진 crate 목록. 외부 crate와 분리해서 레벨을 적용합니다.
const ENGINE_TARGETS: &[&str] = &[
    "trader_core",
    "trader_exchange",
    "trader_risk",
    "trader_execution",
];

const PLAIN_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: true,
            with_target: true,
            dependency_level: default_dependency_level(),
        }
    }
}

impl LogConfig {
    /// 주어진 레벨로 설정 생성.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// 출력 형식 지정.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// span 이벤트 출력 여부 지정.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// `RUST_LOG`, `LOG_FORMAT` 환경 변수가 있으면 그 값으로 덮어씁니다.
    pub fn apply_env(mut self) -> Self {
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.level = level;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|s| s.parse().ok()) {
            self.format = format;
        }
        self
    }

    /// 실제 `EnvFilter`에 넘길 지시문.
    ///
    /// `level`이 "debug"처럼 단일 레벨이면 엔진 crate에만 그 레벨을 주고
    /// 나머지는 `dependency_level`로 묶습니다. 그 외에는 그대로 사용합니다.
    pub fn filter_directives(&self) -> String {
        let level = self.level.trim();
        if !PLAIN_LEVELS.contains(&level.to_lowercase().as_str()) {
            return level.to_string();
        }

        let mut directives = vec![self.dependency_level.clone()];
        directives.extend(ENGINE_TARGETS.iter().map(|t| format!("{}={}", t, level)));
        directives.join(",")
    }

    /// 환경 변수만으로 설정 생성.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }
}

/// 전역 subscriber를 설치합니다.
///
/// 이미 설치되어 있으면 에러를 반환합니다. 테스트에서 여러 번 호출될 수 있는
/// 경우 결과를 무시하면 됩니다.
///
/// ```no_run
/// use trader_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(LogConfig::new("debug").with_format(LogFormat::Json)).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(config.filter_directives())?;

    let fmt_layer = match config.format {
        LogFormat::Pretty => configure(fmt::layer().pretty(), &config),
        LogFormat::Json => configure(fmt::layer().json(), &config),
        LogFormat::Compact => configure(fmt::layer().compact(), &config),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    tracing::info!(
        format = ?config.format,
        filter = %config.filter_directives(),
        "Logging initialized"
    );

    Ok(())
}

fn configure<N, E>(
    layer: fmt::Layer<Registry, N, fmt::format::Format<E>>,
    config: &LogConfig,
) -> Box<dyn Layer<Registry> + Send + Sync>
where
    N: for<'w> fmt::FormatFields<'w> + Send + Sync + 'static,
    fmt::format::Format<E>: fmt::FormatEvent<Registry, N> + Send + Sync + 'static,
{
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    layer
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target)
        .with_span_events(span_events)
        .boxed()
}

/// 환경 변수에서 로깅을 초기화합니다.
pub fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogConfig::from_env())
}
