use mpa_core::config::{AppConfig, LoadOptions};
use mpa_core::domain::AuthorizationStatus;
use mpa_db::{connect_with_config, migrations, ping, DbPool, SqlAuthorizationStore, SqlSettingsStore};
use serde::Serialize;

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

const DATABASE_CHECKS: [&str; 3] =
    ["database_connectivity", "settings_snapshot", "authorization_backlog"];

pub fn run(json_output: bool) -> String {
    run_with(LoadOptions::default(), json_output)
}

pub fn run_with(options: LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_approval_policy(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("approval_policy", "configuration did not load"));
            checks.extend(
                DATABASE_CHECKS
                    .into_iter()
                    .map(|name| DoctorCheck::skipped(name, "configuration did not load")),
            );
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

/// Role-based policies need at least one directory user holding the role to ever find an
/// approver.
fn check_approval_policy(config: &AppConfig) -> DoctorCheck {
    let policy = config.workflow.describe_policy();
    if !config.workflow.approvers.is_empty() {
        return DoctorCheck::pass("approval_policy", policy);
    }

    let role = &config.workflow.approver_role;
    let holders = config
        .directory
        .users
        .iter()
        .filter(|user| user.roles.iter().any(|candidate| candidate == role))
        .count();
    if holders == 0 {
        DoctorCheck::fail(
            "approval_policy",
            format!("{policy}: no directory user holds role `{role}`"),
        )
    } else {
        DoctorCheck::pass("approval_policy", format!("{policy}: {holders} eligible user(s)"))
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return DATABASE_CHECKS
                .into_iter()
                .map(|name| DoctorCheck::fail(name, &details))
                .collect();
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("settings_snapshot", "the database is unreachable"),
                    DoctorCheck::skipped("authorization_backlog", "the database is unreachable"),
                ];
            }
        };

        let checks = database_checks(config, &pool).await;
        pool.close().await;
        checks
    })
}

async fn database_checks(config: &AppConfig, pool: &DbPool) -> Vec<DoctorCheck> {
    let connectivity = match ping(pool).await {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error.to_string()),
    };

    if let Err(error) = migrations::run_pending(pool).await {
        return vec![
            connectivity,
            DoctorCheck::fail("settings_snapshot", format!("migrations failed: {error}")),
            DoctorCheck::skipped("authorization_backlog", "migrations failed"),
        ];
    }

    let snapshot = match SqlSettingsStore::new(pool.clone()).latest_revision().await {
        Ok(Some(revision)) => {
            DoctorCheck::pass("settings_snapshot", format!("configuration revision {revision}"))
        }
        Ok(None) => DoctorCheck::fail(
            "settings_snapshot",
            "no configuration snapshot stored; run `mpa migrate --seed <file>`",
        ),
        Err(error) => DoctorCheck::fail("settings_snapshot", error.to_string()),
    };

    let backlog = match SqlAuthorizationStore::new(pool.clone())
        .count_by_status(AuthorizationStatus::Pending)
        .await
    {
        Ok(pending) => {
            DoctorCheck::pass("authorization_backlog", format!("{pending} pending request(s)"))
        }
        Err(error) => DoctorCheck::fail("authorization_backlog", error.to_string()),
    };

    vec![connectivity, snapshot, backlog]
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

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
