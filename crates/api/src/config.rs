use std::time::Duration;

use ffstage_core::transcode::TranscoderConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to a local client.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for both listeners (default: `127.0.0.1`).
    pub host: String,
    /// Staging HTTP port (default: `56033`).
    pub staging_port: u16,
    /// Session WebSocket port (default: `56034`).
    pub session_port: u16,
    /// URL prefix the external tool uses to fetch staged buffers.
    pub staging_base_url: String,
    /// External tool program (default: `ffmpeg`).
    pub ffmpeg_bin: String,
    /// Per-invocation wall-clock limit in seconds (default: `3600`).
    pub job_timeout_secs: u64,
    /// Concurrent external-tool invocations (default: `4`).
    pub max_concurrent_jobs: usize,
    /// Staging HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Diagnostic mode: keep staged buffers after jobs finish.
    pub retain_staged: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                            |
    /// |------------------------|------------------------------------|
    /// | `HOST`                 | `127.0.0.1`                        |
    /// | `STAGING_PORT`         | `56033`                            |
    /// | `SESSION_PORT`         | `56034`                            |
    /// | `STAGING_BASE_URL`     | `http://localhost:{STAGING_PORT}/` |
    /// | `FFMPEG_BIN`           | `ffmpeg`                           |
    /// | `JOB_TIMEOUT_SECS`     | `3600`                             |
    /// | `MAX_CONCURRENT_JOBS`  | `4`                                |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                               |
    /// | `FFMPEG_VERBOSE`       | unset (`yes`/`true`/`1` enables)   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into());

        let staging_port: u16 = std::env::var("STAGING_PORT")
            .unwrap_or_else(|_| "56033".into())
            .parse()
            .expect("STAGING_PORT must be a valid u16");

        let session_port: u16 = std::env::var("SESSION_PORT")
            .unwrap_or_else(|_| "56034".into())
            .parse()
            .expect("SESSION_PORT must be a valid u16");

        let staging_base_url = std::env::var("STAGING_BASE_URL")
            .map(|url| normalize_base_url(&url))
            .unwrap_or_else(|_| default_base_url(staging_port));

        let ffmpeg_bin = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".into());

        let job_timeout_secs: u64 = std::env::var("JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("JOB_TIMEOUT_SECS must be a valid u64");

        let max_concurrent_jobs: usize = std::env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("MAX_CONCURRENT_JOBS must be a valid usize");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let retain_staged = std::env::var("FFMPEG_VERBOSE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        Self {
            host,
            staging_port,
            session_port,
            staging_base_url,
            ffmpeg_bin,
            job_timeout_secs,
            max_concurrent_jobs,
            request_timeout_secs,
            retain_staged,
        }
    }

    /// Settings handed to the core transcoder.
    pub fn transcoder_config(&self) -> TranscoderConfig {
        TranscoderConfig {
            program: self.ffmpeg_bin.clone(),
            staging_base_url: self.staging_base_url.clone(),
            timeout: Duration::from_secs(self.job_timeout_secs),
            max_concurrent: self.max_concurrent_jobs,
            retain_staged: self.retain_staged,
        }
    }
}

/// `http://localhost:{port}/`, the address the tool fetches inputs from.
pub fn default_base_url(port: u16) -> String {
    format!("http://localhost:{port}/")
}

fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}
