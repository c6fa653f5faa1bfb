use crate::cli::Cli;
use crate::error::{DeployError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 기본 설정 파일 이름 (현재 디렉토리 기준)
pub const DEFAULT_CONFIG_FILE: &str = "snowdeploy.toml";

/// 커밋 정보가 없을 때 기록되는 값
pub const DEFAULT_COMMIT_SHA: &str = "manual-run";

/// 실행자 정보가 없을 때 기록되는 값
pub const DEFAULT_ACTOR: &str = "local-user";

/// Snowflake 식별자 1~3개를 '.'으로 연결한 정규화된 테이블 이름
static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:[A-Za-z_][A-Za-z0-9_$]*|"[^"]+")(?:\.(?:[A-Za-z_][A-Za-z0-9_$]*|"[^"]+")){0,2}$"#)
        .expect("table name pattern is valid")
});

/// snowdeploy 실행 설정
///
/// 시작 시 한 번 조립되어 명령어 계층에 전달됩니다.
/// 우선순위: 기본값 < 설정 파일 < 환경 변수 < CLI 플래그
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    /// 실행 환경에서 가져온 출처 정보 (파일에서는 읽지 않음)
    #[serde(skip)]
    pub provenance: Provenance,
}

/// Snowflake 연결 설정
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub account: String,

    #[serde(default)]
    pub user: String,

    pub role: Option<String>,

    pub warehouse: Option<String>,

    #[serde(default)]
    pub database: String,

    pub schema: Option<String>,

    /// PKCS#8 개인 키 파일 경로
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,

    /// 개인 키 암호 (환경 변수로만 설정)
    #[serde(skip)]
    pub private_key_passphrase: Option<String>,

    /// SQL API 기본 URL 재정의 (미지정시 https://<account>.snowflakecomputing.com)
    pub account_url: Option<String>,

    /// HTTP 요청 및 구문 실행 제한 시간 (초)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// 스크립트 탐색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptsConfig {
    /// `*.sql` 파일을 재귀적으로 찾을 루트 디렉토리
    #[serde(default = "default_scripts_root")]
    pub root: PathBuf,
}

/// 감사 기록 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// 감사 테이블 (미지정시 <database>.PUBLIC.DEPLOYMENT_HISTORY)
    pub table: Option<String>,

    #[serde(default)]
    pub on_failure: AuditFailurePolicy,
}

/// 감사 기록 쓰기 실패 시 배치 처리 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuditFailurePolicy {
    /// 남은 스크립트를 실행하지 않고 즉시 중단
    #[default]
    Abort,
    /// 오류를 기록하고 다음 스크립트로 진행
    Continue,
}

impl AuditFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditFailurePolicy::Abort => "abort",
            AuditFailurePolicy::Continue => "continue",
        }
    }
}

impl FromStr for AuditFailurePolicy {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(AuditFailurePolicy::Abort),
            "continue" | "skip-and-continue" => Ok(AuditFailurePolicy::Continue),
            other => Err(DeployError::Config(format!(
                "unknown audit failure policy: {} (expected abort or continue)",
                other
            ))),
        }
    }
}

/// 배포 출처 정보 (커밋, 실행자)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub commit_sha: String,
    pub actor: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            commit_sha: DEFAULT_COMMIT_SHA.to_string(),
            actor: DEFAULT_ACTOR.to_string(),
        }
    }
}

impl Provenance {
    /// `GITHUB_SHA`, `GITHUB_ACTOR` 에서 출처 정보 구성
    ///
    /// 값이 없거나 비어 있으면 기본값을 사용합니다.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            // 설정되었지만 빈 값도 미설정과 같이 기본값 사용
            commit_sha: non_empty(&lookup, "GITHUB_SHA").unwrap_or(defaults.commit_sha),
            actor: non_empty(&lookup, "GITHUB_ACTOR").unwrap_or(defaults.actor),
        }
    }
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("snowflake_cicd_key.p8")
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_scripts_root() -> PathBuf {
    PathBuf::from("Snowflake")
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            user: String::new(),
            role: None,
            warehouse: None,
            database: String::new(),
            schema: None,
            private_key_path: default_private_key_path(),
            private_key_passphrase: None,
            account_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// 암호가 로그에 남지 않도록 직접 구현
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("role", &self.role)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("private_key_path", &self.private_key_path)
            .field(
                "private_key_passphrase",
                &self.private_key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("account_url", &self.account_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ConnectionConfig {
    /// SQL API 기본 URL (끝의 '/' 제거)
    pub fn base_url(&self) -> String {
        match &self.account_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.snowflakecomputing.com",
                self.account.to_lowercase()
            ),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            root: default_scripts_root(),
        }
    }
}

impl Config {
    /// 설정 파일에서 로드
    ///
    /// 경로를 지정하면 파일이 반드시 있어야 하고, 지정하지 않으면
    /// `./snowdeploy.toml` 이 있을 때만 읽습니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| {
            DeployError::Config(format!("cannot read {}: {}", config_path.display(), e))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 설정 파일, 프로세스 환경 변수, CLI 플래그를 합쳐 최종 설정 생성
    pub fn from_sources(cli: &Cli) -> Result<Self> {
        let mut config = Self::load(cli.config.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// 환경 변수 값으로 덮어쓰기
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let conn = &mut self.connection;

        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_ACCOUNT") {
            conn.account = v;
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_USER") {
            conn.user = v;
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_ROLE") {
            conn.role = Some(v);
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_WAREHOUSE") {
            conn.warehouse = Some(v);
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_DATABASE") {
            conn.database = v;
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_SCHEMA") {
            conn.schema = Some(v);
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_PRIVATE_KEY_PATH") {
            conn.private_key_path = PathBuf::from(v);
        }
        // 암호는 공백도 유효한 문자이므로 trim 하지 않음
        if let Some(v) = lookup("SNOWFLAKE_PRIVATE_KEY_PASSPHRASE").filter(|v| !v.is_empty()) {
            conn.private_key_passphrase = Some(v);
        }
        if let Some(v) = non_empty(&lookup, "SNOWFLAKE_ACCOUNT_URL") {
            conn.account_url = Some(v);
        }

        if let Some(v) = non_empty(&lookup, "SNOWDEPLOY_SCRIPTS_DIR") {
            self.scripts.root = PathBuf::from(v);
        }
        if let Some(v) = non_empty(&lookup, "SNOWDEPLOY_AUDIT_TABLE") {
            self.audit.table = Some(v);
        }
        if let Some(v) = non_empty(&lookup, "SNOWDEPLOY_ON_AUDIT_FAILURE") {
            self.audit.on_failure = v.parse()?;
        }

        self.provenance = Provenance::from_lookup(&lookup);

        Ok(())
    }

    /// CLI 플래그로 덮어쓰기
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.scripts_dir {
            self.scripts.root = dir.clone();
        }
        if let Some(table) = &cli.audit_table {
            self.audit.table = Some(table.clone());
        }
        if let Some(policy) = cli.on_audit_failure {
            self.audit.on_failure = policy;
        }
    }

    /// 감사 테이블의 정규화된 이름
    pub fn audit_table(&self) -> String {
        match &self.audit.table {
            Some(table) => table.clone(),
            None => format!("{}.PUBLIC.DEPLOYMENT_HISTORY", self.connection.database),
        }
    }

    /// 연결에 필요한 값과 감사 테이블 이름 검증
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        let missing: Vec<&str> = [
            ("account (SNOWFLAKE_ACCOUNT)", conn.account.is_empty()),
            ("user (SNOWFLAKE_USER)", conn.user.is_empty()),
            ("database (SNOWFLAKE_DATABASE)", conn.database.is_empty()),
        ]
        .iter()
        .filter(|(_, is_missing)| *is_missing)
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(DeployError::Config(format!(
                "missing required connection settings: {}",
                missing.join(", ")
            )));
        }

        if conn.timeout_secs == 0 {
            return Err(DeployError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let table = self.audit_table();
        if !is_valid_table_name(&table) {
            return Err(DeployError::Config(format!(
                "invalid audit table name: {}",
                table
            )));
        }

        Ok(())
    }
}

/// 감사 테이블 이름이 Snowflake 식별자 형식인지 확인
///
/// 테이블 이름은 INSERT 문에 직접 들어가므로 식별자 이외의 문자는 허용하지 않습니다.
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_NAME_REGEX.is_match(name)
}
