use clap::Parser;
use colored::*;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use snowdeploy::cli::Cli;
use snowdeploy::commands;
use snowdeploy::config::Config;
use snowdeploy::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.debug {
        eprintln!("{} {:?}", "DEBUG:".yellow(), cli);
    }

    // 스크립트 실패는 감사 기록으로 남기고 성공 종료, 인프라 오류만 실패 종료
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "[X]".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::from_sources(cli)?;
    commands::execute_deploy(cli, &config).await
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("snowdeploy=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snowdeploy=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
