use std::path::PathBuf;

/// Runtime configuration assembled from the environment.
///
/// | Env var | Default | Purpose |
/// |---------|---------|---------|
/// | `PORT` | `8080` | HTTP listen port |
/// | `DATABASE_PATH` | `verdict.db` | sqlite database file |
/// | `DATASET_ROOT` | `./datasets` | dataset CSVs + `catalog.json` |
/// | `MEMORY_SERVICE_URL` | (none) | remote memory backend; in-process store if unset |
/// | `RESEARCH_SERVICE_URL` | (none) | research service; research stage skipped if unset |
/// | `PLANNER_SERVICE_URL` | (none) | AI planner; planner errors surface if unset |
/// | `PLANNER_MODE` | `remote` | `builtin` selects the rule-based planner |
/// | `BROKER_SERVICE_URL` | (none) | broker adapter; paper broker if unset |
/// | `RISK_POLICY_VERSION` | `v1` | version tag stamped on violation audits |
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub dataset_root: PathBuf,
    pub memory_service_url: Option<String>,
    pub research_service_url: Option<String>,
    pub planner_service_url: Option<String>,
    pub planner_mode: PlannerMode,
    pub broker_service_url: Option<String>,
    pub risk_policy_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerMode {
    Remote,
    Builtin,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("PORT is not a valid port number: {raw}"))?,
            Err(_) => 8080,
        };

        let planner_mode = match std::env::var("PLANNER_MODE").as_deref() {
            Ok("builtin") => PlannerMode::Builtin,
            _ => PlannerMode::Remote,
        };

        Ok(Self {
            port,
            database_path: env_path("DATABASE_PATH", "verdict.db"),
            dataset_root: env_path("DATASET_ROOT", "./datasets"),
            memory_service_url: env_opt("MEMORY_SERVICE_URL"),
            research_service_url: env_opt("RESEARCH_SERVICE_URL"),
            planner_service_url: env_opt("PLANNER_SERVICE_URL"),
            planner_mode,
            broker_service_url: env_opt("BROKER_SERVICE_URL"),
            risk_policy_version: std::env::var("RISK_POLICY_VERSION")
                .unwrap_or_else(|_| "v1".to_string()),
        })
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
