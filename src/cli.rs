use clap::Parser;

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "gphotos-backup-rs",
    version,
    about = "Back up a Google Photos library into year/month folders"
)]
pub struct Cli {
    /// Backup destination directory
    #[arg(long, default_value = "./backup")]
    pub dest: String,

    /// Directory holding token.json
    #[arg(long, default_value = "./credentials")]
    pub credentials_dir: String,

    /// OAuth access token (overrides token.json).
    /// WARNING: passing via --access-token is visible in process listings.
    /// Prefer the GPHOTOS_ACCESS_TOKEN environment variable instead.
    #[arg(long, env = "GPHOTOS_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Number of concurrent downloads
    #[arg(long, default_value_t = 4)]
    pub workers: u16,

    /// Attempts per item, including the first
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Base delay in seconds for exponential backoff between attempts
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Connect and read timeout for HTTP requests, in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Directory for in-progress downloads (default: <dest>/.gphotos-tmp)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Only check that the access token is accepted
    #[arg(long)]
    pub auth_only: bool,

    /// Only print year/month statistics, do not download
    #[arg(long)]
    pub list_only: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}
