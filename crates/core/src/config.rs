use std::env;
use std::path::PathBuf;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::resource::{parse_bytes, parse_gpu_boards, GpuBoard};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default working directory: $TMPDIR when set, otherwise /tmp.
fn default_working_dir() -> PathBuf {
    if let Some(dir) = env_opt("TMPDIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("/tmp")
}

// ── Runner config ─────────────────────────────────────────────

/// Runner configuration, read from environment variables (the binary's CLI
/// flags override individual fields before validation).
///
/// Byte limits are kept as the raw operator-supplied strings so that
/// [`Config::validate`] can report every bad value in a single pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project namespace this runner serves. Scopes queue discovery,
    /// backoff keys and log messages.
    pub project: String,
    /// Path to the credentials file handed to the task-queue provider.
    pub credentials: String,
    /// Task-queue driver selector (e.g. "memory").
    pub driver: String,
    /// Local scratch space for experiment artifacts.
    pub working_dir: PathBuf,
    /// Leave debugging artifacts in place (developers only).
    pub debug: bool,
    /// Maximum cores handed to tasks; 0 means all available.
    pub max_cores: u32,
    /// Maximum RAM for tasks, human units; "0gb" means all available.
    pub max_mem: String,
    /// Maximum scratch disk for tasks, human units; "0gb" means unbounded.
    pub max_disk: String,
    /// GPU board inventory, e.g. "4x16GiB,2x8GiB"; empty means no GPUs.
    pub gpu_boards: String,
    /// Operator chat webhook; notifications are skipped when unset.
    pub webhook_url: Option<String>,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            project: env_or("GANTRY_PROJECT", ""),
            credentials: env_or("GANTRY_CREDENTIALS", ""),
            driver: env_or("GANTRY_DRIVER", "memory"),
            working_dir: env_opt("GANTRY_WORKING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_working_dir),
            debug: env_bool("GANTRY_DEBUG", false),
            max_cores: env_u32("GANTRY_MAX_CORES", 0),
            max_mem: env_or("GANTRY_MAX_MEM", "0gb"),
            max_disk: env_or("GANTRY_MAX_DISK", "0gb"),
            gpu_boards: env_or("GANTRY_GPU_BOARDS", ""),
            webhook_url: env_opt("GANTRY_WEBHOOK_URL"),
        }
    }

    /// Gather every fatal configuration problem in one pass so the
    /// operator fixes them all at once instead of retrying one by one.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.project.is_empty() {
            problems.push(
                "no project configured; set GANTRY_PROJECT to the project \
                 whose queues this runner should serve"
                    .to_string(),
            );
        }
        if self.credentials.is_empty() {
            problems.push(
                "no credentials configured; set GANTRY_CREDENTIALS to a valid \
                 credentials file name"
                    .to_string(),
            );
        } else if !PathBuf::from(&self.credentials).is_file() {
            problems.push(format!(
                "credentials file {} could not be found",
                self.credentials
            ));
        }
        if self.working_dir.as_os_str().is_empty() {
            problems.push(
                "the working directory option must name a valid location, or \
                 TMPDIR needs to be set"
                    .to_string(),
            );
        } else if !self.working_dir.is_dir() {
            problems.push(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            ));
        }
        if let Err(e) = self.limits() {
            problems.push(format!("the memory or disk limit options were flawed: {e}"));
        }
        if let Err(e) = self.boards() {
            problems.push(format!("the GPU inventory option was flawed: {e}"));
        }

        problems
    }

    /// Parsed task resource ceilings. Zero components mean unbounded.
    pub fn limits(&self) -> Result<Limits, CoreError> {
        Ok(Limits {
            max_cores: self.max_cores,
            max_mem: parse_bytes(&self.max_mem)?,
            max_disk: parse_bytes(&self.max_disk)?,
        })
    }

    /// Parsed GPU board inventory.
    pub fn boards(&self) -> Result<Vec<GpuBoard>, CoreError> {
        parse_gpu_boards(&self.gpu_boards)
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  project:     {}", self.project);
        tracing::info!("  driver:      {}", self.driver);
        tracing::info!("  working_dir: {}", self.working_dir.display());
        tracing::info!(
            "  limits:      cores={} mem={} disk={}",
            self.max_cores,
            self.max_mem,
            self.max_disk
        );
        tracing::info!(
            "  gpus:        {}",
            if self.gpu_boards.is_empty() {
                "(none)"
            } else {
                &self.gpu_boards
            }
        );
        tracing::info!(
            "  webhook:     {}",
            if self.webhook_url.is_some() {
                "configured"
            } else {
                "(none)"
            }
        );
    }
}

/// Operator-imposed ceilings on what tasks may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_cores: u32,
    pub max_mem: ByteSize,
    pub max_disk: ByteSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_parse_human_units() {
        let mut cfg = Config::from_env();
        cfg.max_mem = "16GiB".into();
        cfg.max_disk = "512gb".into();
        cfg.max_cores = 8;
        let limits = cfg.limits().unwrap();
        assert_eq!(limits.max_cores, 8);
        assert_eq!(limits.max_mem, ByteSize::gib(16));
        assert_eq!(limits.max_disk, ByteSize::gb(512));
    }

    #[test]
    fn validate_collects_all_problems_at_once() {
        let cfg = Config {
            project: String::new(),
            credentials: "/definitely/not/a/file".into(),
            driver: "memory".into(),
            working_dir: PathBuf::from("/tmp"),
            debug: false,
            max_cores: 0,
            max_mem: "not-a-quantity".into(),
            max_disk: "0gb".into(),
            gpu_boards: "broken".into(),
            webhook_url: None,
        };
        let problems = cfg.validate();
        // project, credentials file, mem limit, gpu inventory
        assert_eq!(problems.len(), 4, "problems: {problems:?}");
    }

    #[test]
    fn validate_passes_for_complete_config() {
        let creds = std::env::temp_dir().join("gantry-test-creds.json");
        std::fs::write(&creds, "{}").unwrap();
        let cfg = Config {
            project: "ml-lab".into(),
            credentials: creds.to_string_lossy().into_owned(),
            driver: "memory".into(),
            working_dir: std::env::temp_dir(),
            debug: false,
            max_cores: 4,
            max_mem: "8GiB".into(),
            max_disk: "100gb".into(),
            gpu_boards: "4x16GiB".into(),
            webhook_url: None,
        };
        assert!(cfg.validate().is_empty());
        std::fs::remove_file(&creds).ok();
    }
}
