pub mod auth;
pub mod snowflake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use snowflake::SnowflakeSession;

/// 바인딩 파라미터 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl SqlValue {
    /// 초 단위 UTC 타임스탬프 문자열
    pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// 텍스트 표현 (NULL 은 None)
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Timestamp(ts) => Some(Self::format_timestamp(ts)),
            SqlValue::Null => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<Option<&str>> for SqlValue {
    fn from(s: Option<&str>) -> Self {
        s.map(SqlValue::from).unwrap_or(SqlValue::Null)
    }
}

/// 웨어하우스 세션 오류
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Snowflake 커넥터와 같은 "코드 (SQLSTATE): 메시지" 형식
    #[error("{code} ({sql_state}): {message}")]
    Statement {
        code: String,
        sql_state: String,
        message: String,
    },

    #[error("Snowflake API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Statement {handle} did not finish within {secs}s")]
    Timeout { handle: String, secs: u64 },

    #[error("Failed to sign JWT: {0}")]
    Token(String),

    #[error("Session is closed")]
    Closed,
}

/// 스크립트 실행과 감사 기록에 쓰이는 웨어하우스 세션
///
/// 하나의 세션을 순차적으로만 사용하므로 모든 메서드가 `&mut self` 를 받습니다.
#[async_trait]
pub trait WarehouseSession: Send {
    /// SQL 배치 실행 (여러 구문 허용)
    async fn execute(&mut self, statement: &str) -> Result<(), WarehouseError>;

    /// 바인딩 파라미터로 한 행 삽입
    ///
    /// `table` 은 신뢰할 수 있는 설정 값이고, 모든 값은 바인딩됩니다.
    async fn insert_row(
        &mut self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
    ) -> Result<(), WarehouseError>;

    /// 세션 해제
    async fn close(&mut self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

/// `INSERT INTO <table> (c1, ...) VALUES (?, ...)` 구문 생성
pub fn build_insert_statement(table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    )
}
