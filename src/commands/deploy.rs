use crate::audit::AuditRecorder;
use crate::cli::Cli;
use crate::config::Config;
use crate::error::{DeployError, Result};
use crate::executor::{BatchOrchestrator, BatchResult};
use crate::source::{ScriptSource, ScriptUnit};
use crate::ui;
use crate::warehouse::{SnowflakeSession, WarehouseSession};
use colored::*;
use tracing::{info, warn};

/// 배포 명령 실행: 스크립트 탐색 → 연결 → 순차 실행 → 결과 출력
pub async fn execute_deploy(cli: &Cli, config: &Config) -> Result<()> {
    if cli.dry_run {
        let source = ScriptSource::new(&config.scripts.root);
        let scripts = source.discover()?;
        ui::print_plan(source.root(), &scripts);
        return Ok(());
    }

    eprintln!(
        "{} Deploying scripts from {}...",
        "[>>]".cyan().bold(),
        config.scripts.root.display().to_string().yellow()
    );

    let result = run_deploy(config).await?;
    ui::print_summary(&result, &config.audit_table());

    // continue 정책에서도 감사 기록이 빠졌다면 실패로 종료
    if result.audit_failures > 0 {
        return Err(DeployError::AuditIncomplete {
            failed: result.audit_failures,
            total: result.total,
        });
    }

    Ok(())
}

/// 설정 검증, 스크립트 탐색, Snowflake 연결 후 배치 실행
///
/// 설정이나 탐색, 인증이 실패하면 스크립트를 하나도 실행하지 않습니다.
pub async fn run_deploy(config: &Config) -> Result<BatchResult> {
    config.validate()?;

    let scripts = ScriptSource::new(&config.scripts.root).discover()?;
    info!(
        count = scripts.len(),
        root = %config.scripts.root.display(),
        "discovered scripts"
    );

    let mut session = SnowflakeSession::connect(&config.connection).await?;
    run_with_session(&mut session, config, scripts).await
}

/// 주어진 세션으로 배치를 실행하고, 결과와 관계없이 세션을 닫음
pub async fn run_with_session<S>(
    session: &mut S,
    config: &Config,
    scripts: Vec<ScriptUnit>,
) -> Result<BatchResult>
where
    S: WarehouseSession + ?Sized,
{
    let orchestrator = BatchOrchestrator::new(
        AuditRecorder::new(config.audit_table()),
        config.provenance.clone(),
        config.audit.on_failure,
    );

    let result = orchestrator.run(session, scripts).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close warehouse session");
    }

    result
}
