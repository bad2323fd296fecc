//! 설정 로딩.
//!
//! 각 크레이트는 자신의 설정 구조체(serde 기본값 포함)를 정의하고, 여기의
//! [`load_config`]로 TOML 파일과 환경 변수를 겹쳐서 읽습니다.

use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{TraderError, TraderResult};

/// 환경 변수 접두사 기본값 (`TRADER__RISK__MAX_DAILY_LOSS=75`).
pub const DEFAULT_ENV_PREFIX: &str = "TRADER";

/// 파일과 환경 변수에서 설정을 로드합니다.
///
/// 파일이 없으면 건너뛰고 구조체의 serde 기본값과 환경 변수만 사용합니다.
/// 환경 변수는 `{prefix}__섹션__키` 형식입니다.
pub fn load_config<T, P>(path: P, env_prefix: &str) -> TraderResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    // .env 파일이 있으면 프로세스 환경에 반영
    dotenvy::dotenv().ok();

    let path = path.as_ref();
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    settings.try_deserialize().map_err(|e| {
        TraderError::Config(format!("{}: {}", path.display(), e))
    })
}

/// TOML 문자열에서 설정을 파싱합니다 (테스트, 임베디드 기본값용).
pub fn parse_config_str<T: DeserializeOwned>(toml_text: &str) -> TraderResult<T> {
    let settings = config::Config::builder()
        .add_source(config::File::from_str(toml_text, config::FileFormat::Toml))
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default = "default_name")]
        name: String,
        #[serde(default)]
        limit: u32,
    }

    fn default_name() -> String {
        "sample".to_string()
    }

    #[test]
    fn test_parse_config_str() {
        let sample: Sample = parse_config_str("limit = 7").unwrap();
        assert_eq!(sample.name, "sample");
        assert_eq!(sample.limit, 7);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "name = \"from-file\"\nlimit = 3").unwrap();

        let sample: Sample = load_config(file.path(), "TRADER_CORE_TEST").unwrap();
        assert_eq!(sample.name, "from-file");
        assert_eq!(sample.limit, 3);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let sample: Sample = load_config("does/not/exist.toml", "TRADER_CORE_MISSING").unwrap();
        assert_eq!(sample.name, "sample");
        assert_eq!(sample.limit, 0);
    }
}
