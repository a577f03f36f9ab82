/// Periodic check loop: run each check on its own interval and write one JSON
/// line per run to stdout.
use crate::command::{CommandRunner, SystemRunner};
use crate::config::AgentConfig;
use crate::log_tail;
use crate::qstar;
use crate::state::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// The checks this collector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CheckKind {
    Qstar,
    Log,
}

impl CheckKind {
    pub const ALL: [CheckKind; 2] = [CheckKind::Qstar, CheckKind::Log];

    pub fn key(self) -> &'static str {
        match self {
            CheckKind::Qstar => "qstar",
            CheckKind::Log => "log",
        }
    }

    pub fn interval(self, config: &AgentConfig) -> Duration {
        match self {
            CheckKind::Qstar => config.qstar_interval,
            CheckKind::Log => config.log_interval,
        }
    }
}

/// Outcome of one check run, as written to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub check: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run one check synchronously.
pub fn run_check(kind: CheckKind, config: &AgentConfig, runner: &dyn CommandRunner) -> CheckReport {
    let result = match kind {
        CheckKind::Qstar => qstar::check_qstar(runner)
            .map_err(|e| e.to_string())
            .and_then(|s| s.into_state().map_err(|e| e.to_string())),
        CheckKind::Log => log_tail::check_log(&config.log)
            .map_err(|e| e.to_string())
            .and_then(|s| s.into_state().map_err(|e| e.to_string())),
    };

    let (state, error) = match result {
        Ok(state) => {
            let counts: Vec<String> = state
                .iter()
                .map(|(kind, items)| format!("{kind}={}", items.len()))
                .collect();
            tracing::info!(check = kind.key(), records = %counts.join(" "), "check finished");
            (Some(state), None)
        }
        Err(e) => {
            tracing::error!(check = kind.key(), error = %e, "check failed");
            (None, Some(e))
        }
    };

    CheckReport {
        check: kind.key(),
        timestamp: Utc::now(),
        state,
        error,
    }
}

/// Print a report as a single JSON line.
pub fn emit(report: &CheckReport) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(check = report.check, error = %e, "failed to serialize report"),
    }
}

/// Run `checks` on their intervals until Ctrl-C.
pub async fn run_forever(config: Arc<AgentConfig>, checks: Vec<CheckKind>) {
    let mut tasks = JoinSet::new();
    for kind in checks {
        tracing::info!(
            check = kind.key(),
            interval_secs = kind.interval(&config).as_secs(),
            "planning check"
        );
        tasks.spawn(plan(kind, Arc::clone(&config)));
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("interrupt received, shutting down"),
        Err(e) => tracing::error!(error = %e, "failed to listen for interrupt, shutting down"),
    }
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
}

async fn plan(kind: CheckKind, config: Arc<AgentConfig>) {
    let mut ticker = tokio::time::interval(kind.interval(&config));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let config = Arc::clone(&config);
        let joined =
            tokio::task::spawn_blocking(move || run_check(kind, &config, &SystemRunner)).await;
        match joined {
            Ok(report) => emit(&report),
            Err(e) => tracing::error!(check = kind.key(), error = %e, "check task panicked"),
        }
    }
}
