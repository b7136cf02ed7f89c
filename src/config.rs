use std::path::PathBuf;
use std::time::Duration;

use crate::backup::BackupConfig;
use crate::retry::RetryConfig;
use crate::types::LogLevel;

/// Scratch directory name under the destination root.
pub const DEFAULT_SCRATCH_DIR: &str = ".gphotos-tmp";

/// Longest backoff between attempts, in seconds.
const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Validated application configuration.
pub struct Config {
    pub dest: PathBuf,
    pub credentials_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub workers: usize,
    pub log_level: LogLevel,
    pub auth_only: bool,
    pub list_only: bool,
    pub json: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("dest", &self.dest)
            .field("credentials_dir", &self.credentials_dir)
            .field("scratch_dir", &self.scratch_dir)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("workers", &self.workers)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        if cli.workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        if cli.max_attempts == 0 {
            anyhow::bail!("--max-attempts must be at least 1");
        }
        if cli.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }

        let dest = expand_tilde(&cli.dest);
        let scratch_dir = cli
            .scratch_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| dest.join(DEFAULT_SCRATCH_DIR));

        Ok(Self {
            credentials_dir: expand_tilde(&cli.credentials_dir),
            scratch_dir,
            dest,
            access_token: cli.access_token,
            timeout: Duration::from_secs(cli.timeout),
            retry: RetryConfig {
                max_attempts: cli.max_attempts,
                base_delay_secs: cli.retry_delay,
                max_delay_secs: MAX_RETRY_DELAY_SECS.max(cli.retry_delay),
            },
            workers: cli.workers as usize,
            log_level: cli.log_level,
            auth_only: cli.auth_only,
            list_only: cli.list_only,
            json: cli.json,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            root: self.dest.clone(),
            scratch_dir: self.scratch_dir.clone(),
            concurrency: self.workers,
            retry: self.retry,
            request_timeout: self.timeout,
            no_progress_bar: self.no_progress_bar,
        }
    }
}
