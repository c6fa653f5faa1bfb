use clap::Parser;
use std::path::PathBuf;

use crate::config::AuditFailurePolicy;

#[derive(Parser, Debug)]
#[command(name = "snowdeploy")]
#[command(version)]
#[command(about = "Sequential SQL migration runner with a Snowflake audit trail", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (미지정시 ./snowdeploy.toml 이 있으면 사용)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// SQL 스크립트 루트 디렉토리
    #[arg(long)]
    pub scripts_dir: Option<PathBuf>,

    /// 감사 기록 테이블 (예: "MY_DB.PUBLIC.DEPLOYMENT_HISTORY")
    #[arg(long)]
    pub audit_table: Option<String>,

    /// 감사 기록 실패 시 동작 (abort, continue)
    #[arg(long, value_enum)]
    pub on_audit_failure: Option<AuditFailurePolicy>,

    /// 실행 순서만 출력하고 연결하지 않음
    #[arg(long)]
    pub dry_run: bool,

    /// 디버그 모드
    #[arg(short = 'd', long)]
    pub debug: bool,
}
