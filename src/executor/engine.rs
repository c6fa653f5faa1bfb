use crate::source::ScriptUnit;
use crate::warehouse::WarehouseSession;
use tracing::{debug, warn};

/// 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
        }
    }
}

/// 스크립트 하나의 실행 결과
///
/// 실패일 때만 오류 메시지를 가집니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure(String),
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Success => ExecutionStatus::Success,
            ExecutionOutcome::Failure(_) => ExecutionStatus::Failure,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::Failure(detail) => Some(detail),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// 스크립트 실행기
///
/// 세션 오류를 전파하지 않고 모두 `ExecutionOutcome::Failure` 로 변환합니다.
#[derive(Debug, Default)]
pub struct ExecutionEngine;

impl ExecutionEngine {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute<S>(&self, session: &mut S, unit: &ScriptUnit) -> ExecutionOutcome
    where
        S: WarehouseSession + ?Sized,
    {
        let content = match unit.read_content() {
            Ok(content) => content,
            Err(e) => {
                warn!(script = %unit.name, error = %e, "cannot read script");
                return ExecutionOutcome::Failure(format!(
                    "cannot read {}: {}",
                    unit.path.display(),
                    e
                ));
            }
        };

        // 공백만 있는 스크립트도 빈 스크립트로 보고 전송하지 않음
        if content.trim().is_empty() {
            debug!(script = %unit.name, "empty script, nothing to submit");
            return ExecutionOutcome::Success;
        }

        match session.execute(&content).await {
            Ok(()) => ExecutionOutcome::Success,
            Err(e) => ExecutionOutcome::Failure(e.to_string()),
        }
    }
}
