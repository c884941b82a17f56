use std::sync::Arc;

use airloop_agent::ConversationRuntime;
use airloop_core::audit::NoopAuditSink;
use airloop_core::config::AppConfig;
use airloop_db::migrations::{self, MIGRATOR};
use airloop_db::{connect_with_config, InMemoryBookingRepository, InMemorySessionRepository};
use serde::Serialize;

use crate::commands::{prepare, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match prepare("doctor") {
        Ok((config, runtime)) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_agent_wiring(&config));
            checks.extend(runtime.block_on(check_database(&config)));
        }
        Err(failure) => {
            checks.push(DoctorCheck::fail("config_validation", failure.output));
            let reason = "configuration did not load";
            checks.push(DoctorCheck::skipped("agent_wiring", reason));
            checks.push(DoctorCheck::skipped("database_connectivity", reason));
            checks.push(DoctorCheck::skipped("schema_migrations", reason));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Every agent's guardrails and tools must resolve and the handoff graph must be sound.
fn check_agent_wiring(config: &AppConfig) -> DoctorCheck {
    let assembled = ConversationRuntime::airline_default(
        config,
        Arc::new(InMemoryBookingRepository::default()),
        Arc::new(InMemorySessionRepository::default()),
        Arc::new(NoopAuditSink),
    );

    match assembled {
        Ok(runtime) => DoctorCheck::pass(
            "agent_wiring",
            format!(
                "{} agents registered, hub `{}`",
                runtime.registry().agents().count(),
                runtime.registry().hub().map(|spec| spec.name.as_str()).unwrap_or("<none>")
            ),
        ),
        Err(error) => DoctorCheck::fail("agent_wiring", error.to_string()),
    }
}

async fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let pool = match connect_with_config(&config.database).await {
        Ok(pool) => pool,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to connect to database: {error}"),
                ),
                DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
            ];
        }
    };

    let connectivity = DoctorCheck::pass(
        "database_connectivity",
        format!("connected using `{}`", config.database.url),
    );

    let known = MIGRATOR.iter().filter(|migration| migration.migration_type.is_up_migration());
    let known: Vec<i64> = known.map(|migration| migration.version).collect();
    let migrations = match migrations::applied_versions(&pool).await {
        Ok(applied) => {
            let pending: Vec<String> = known
                .iter()
                .filter(|version| !applied.contains(version))
                .map(ToString::to_string)
                .collect();
            if pending.is_empty() {
                let details = format!("{} migrations applied", applied.len());
                DoctorCheck::pass("schema_migrations", details)
            } else {
                DoctorCheck::fail(
                    "schema_migrations",
                    format!("pending migrations: {} (run `airloop migrate`)", pending.join(", ")),
                )
            }
        }
        Err(error) => DoctorCheck::fail("schema_migrations", error.to_string()),
    };

    pool.close().await;
    vec![connectivity, migrations]
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
