use crate::config::Provenance;
use crate::executor::{ExecutionOutcome, ExecutionStatus};
use crate::source::ScriptUnit;
use crate::warehouse::{SqlValue, WarehouseError, WarehouseSession};
use chrono::{DateTime, SubsecRound, Utc};

/// 감사 테이블 컬럼 (삽입 순서)
pub const AUDIT_COLUMNS: [&str; 6] = [
    "DEPLOYMENT_TIMESTAMP",
    "FILENAME",
    "COMMIT_SHA",
    "GITHUB_ACTOR",
    "STATUS",
    "ERROR_MESSAGE",
];

/// 스크립트 실행 한 번에 대한 감사 기록
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// UTC, 초 단위
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub commit_sha: String,
    pub actor: String,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
}

impl AuditRecord {
    pub fn new(
        unit: &ScriptUnit,
        outcome: &ExecutionOutcome,
        provenance: &Provenance,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: at.trunc_subsecs(0),
            filename: unit.name.clone(),
            commit_sha: provenance.commit_sha.clone(),
            actor: provenance.actor.clone(),
            status: outcome.status(),
            error_message: outcome.error_detail().map(str::to_string),
        }
    }

    /// `AUDIT_COLUMNS` 순서의 바인딩 값
    pub fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Timestamp(self.timestamp),
            SqlValue::from(self.filename.as_str()),
            SqlValue::from(self.commit_sha.as_str()),
            SqlValue::from(self.actor.as_str()),
            SqlValue::from(self.status.as_str()),
            SqlValue::from(self.error_message.as_deref()),
        ]
    }
}

/// 감사 기록기 - 기존 감사 테이블에 한 행씩 추가
///
/// 테이블을 만들거나 변경하지 않습니다.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    table: String,
}

impl AuditRecorder {
    /// `table` 은 검증된 설정 값이어야 합니다 (`Config::validate`).
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn record<S>(&self, session: &mut S, record: &AuditRecord) -> Result<(), WarehouseError>
    where
        S: WarehouseSession + ?Sized,
    {
        session
            .insert_row(&self.table, &AUDIT_COLUMNS, &record.values())
            .await
    }
}
