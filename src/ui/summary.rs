use crate::executor::BatchResult;
use crate::source::ScriptUnit;
use colored::*;
use std::path::Path;

/// 실행 계획 출력 (--dry-run)
pub fn print_plan(root: &Path, scripts: &[ScriptUnit]) {
    if scripts.is_empty() {
        eprintln!(
            "{} No *.sql files found under {}.",
            "[X]".red(),
            root.display().to_string().yellow()
        );
        return;
    }

    eprintln!(
        "{} {} scripts would be executed in this order:",
        "[PLAN]".cyan().bold(),
        scripts.len().to_string().bold()
    );

    for (idx, script) in scripts.iter().enumerate() {
        eprintln!(
            "  {}. {}",
            idx + 1,
            script.path.display().to_string().dimmed()
        );
    }

    eprintln!("\n{} Dry run: nothing was executed or recorded.", "[i]".cyan());
}

/// 배치 결과 출력
pub fn print_summary(result: &BatchResult, audit_table: &str) {
    eprintln!("\n{} Deployment complete!", "[OK]".green().bold());
    eprintln!("  - Total scripts: {}", result.total);
    eprintln!("  - Success: {}", result.success_count.to_string().green());
    eprintln!("  - Failed: {}", result.failure_count.to_string().red());
    if result.total > 0 {
        eprintln!("  - Success rate: {:.1}%", result.success_rate());
    }
    eprintln!("  - Execution time: {}ms", result.total_duration_ms);
    eprintln!("  - Audit table: {}", audit_table.cyan());

    let failed = result.failed_scripts();
    if !failed.is_empty() {
        eprintln!("\n{} Failed scripts (recorded in the audit table):", "[X]".red());
        for script in failed {
            eprintln!(
                "  - {}: {}",
                script.name,
                script.outcome.error_detail().unwrap_or_default().red()
            );
        }
    }

    if result.audit_failures > 0 {
        eprintln!(
            "\n{} {} audit records could not be written:",
            "[!]".yellow().bold(),
            result.audit_failures
        );
        for script in result.script_results.iter().filter(|r| !r.audited) {
            eprintln!("  - {}", script.name.yellow());
        }
    }
}
