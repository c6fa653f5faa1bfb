use crate::audit::{AuditRecord, AuditRecorder};
use crate::config::{AuditFailurePolicy, Provenance};
use crate::error::{DeployError, Result};
use crate::executor::engine::{ExecutionEngine, ExecutionOutcome};
use crate::source::ScriptUnit;
use crate::warehouse::WarehouseSession;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// 스크립트 실행 결과
#[derive(Debug, Clone)]
pub struct ScriptResult {
    /// 파일 이름
    pub name: String,
    /// 전체 경로
    pub path: PathBuf,
    /// 실행 결과
    pub outcome: ExecutionOutcome,
    /// 감사 기록 저장 여부
    pub audited: bool,
    /// 실행 시간 (밀리초)
    pub duration_ms: u128,
}

/// 배치 실행 결과
#[derive(Debug, Default)]
pub struct BatchResult {
    /// 총 스크립트 수
    pub total: usize,
    /// 성공한 스크립트 수
    pub success_count: usize,
    /// 실패한 스크립트 수
    pub failure_count: usize,
    /// 감사 기록 저장에 실패한 수 (on_failure = "continue" 일 때만 0 이상)
    pub audit_failures: usize,
    /// 개별 스크립트 결과 (실행 순서)
    pub script_results: Vec<ScriptResult>,
    /// 전체 실행 시간 (밀리초)
    pub total_duration_ms: u128,
}

impl BatchResult {
    /// 모든 스크립트가 성공했는지 확인
    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }

    /// 실패한 스크립트 목록
    pub fn failed_scripts(&self) -> Vec<&ScriptResult> {
        self.script_results
            .iter()
            .filter(|r| !r.outcome.is_success())
            .collect()
    }

    /// 성공률 계산
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.success_count as f64 / self.total as f64) * 100.0
    }
}

/// 배치 실행기
///
/// 스크립트를 순서대로 하나씩 실행하고, 각 실행마다 감사 기록을 남긴 뒤
/// 결과와 관계없이 다음 스크립트로 진행합니다.
pub struct BatchOrchestrator {
    engine: ExecutionEngine,
    recorder: AuditRecorder,
    provenance: Provenance,
    policy: AuditFailurePolicy,
}

impl BatchOrchestrator {
    pub fn new(recorder: AuditRecorder, provenance: Provenance, policy: AuditFailurePolicy) -> Self {
        Self {
            engine: ExecutionEngine::new(),
            recorder,
            provenance,
            policy,
        }
    }

    /// 스크립트 목록 순서대로 실행
    ///
    /// 스크립트 실패는 결과로만 남습니다. 감사 기록 실패는 `abort` 정책일 때
    /// 남은 스크립트를 실행하지 않고 `DeployError::AuditWrite` 를 반환합니다.
    pub async fn run<S>(&self, session: &mut S, scripts: Vec<ScriptUnit>) -> Result<BatchResult>
    where
        S: WarehouseSession + ?Sized,
    {
        let start_time = Instant::now();
        let total = scripts.len();

        info!(
            total,
            audit_table = self.recorder.table(),
            policy = self.policy.as_str(),
            "starting deployment"
        );

        let mut results = Vec::with_capacity(total);
        let mut audit_failures = 0;

        for (idx, unit) in scripts.into_iter().enumerate() {
            let script_start = Instant::now();
            info!(script = %unit.name, "[{}/{}] executing", idx + 1, total);

            let outcome = self.engine.execute(session, &unit).await;
            let duration_ms = script_start.elapsed().as_millis();

            match &outcome {
                ExecutionOutcome::Success => {
                    info!(script = %unit.name, duration_ms = duration_ms as u64, "SUCCESS");
                }
                ExecutionOutcome::Failure(detail) => {
                    warn!(script = %unit.name, duration_ms = duration_ms as u64, error = %detail, "FAILURE");
                }
            }

            let record = AuditRecord::new(&unit, &outcome, &self.provenance, Utc::now());
            let audited = match self.recorder.record(session, &record).await {
                Ok(()) => true,
                Err(e) => match self.policy {
                    AuditFailurePolicy::Abort => {
                        error!(script = %unit.name, error = %e, "audit write failed, aborting batch");
                        return Err(DeployError::AuditWrite {
                            filename: unit.name,
                            message: e.to_string(),
                        });
                    }
                    AuditFailurePolicy::Continue => {
                        error!(script = %unit.name, error = %e, "audit write failed, continuing");
                        audit_failures += 1;
                        false
                    }
                },
            };

            results.push(ScriptResult {
                name: unit.name,
                path: unit.path,
                outcome,
                audited,
                duration_ms,
            });
        }

        let success_count = results.iter().filter(|r| r.outcome.is_success()).count();
        let failure_count = results.len() - success_count;

        Ok(BatchResult {
            total,
            success_count,
            failure_count,
            audit_failures,
            script_results: results,
            total_duration_ms: start_time.elapsed().as_millis(),
        })
    }
}
