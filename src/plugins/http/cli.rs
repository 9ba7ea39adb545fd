use crate::plugins::registry::{CliPlugin, HostConfig};
use clap::{Arg, ArgMatches, Command};

pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn get_arg<'a>(matches: &'a ArgMatches, id: &str) -> Option<&'a String> {
    matches.try_get_one::<String>(id).ok().flatten()
}

impl CliPlugin for HttpCliPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn augment_root_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("http_api_url")
                .long("api-url")
                .help_heading("HTTP")
                .help("Base URL of the podcast history API")
                .env("PODTRACK_API_URL")
                .default_value("http://localhost:8000/api")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .help_heading("HTTP")
                .help("HTTP User-Agent")
                .default_value("podtrack/0.1")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_secs")
                .long("timeout-secs")
                .help_heading("HTTP")
                .help("HTTP timeout in seconds")
                .default_value("30")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("http_retries")
                .long("retries")
                .help_heading("HTTP")
                .help("Retries for transient errors on read requests")
                .default_value("2")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("http_retry_backoff_ms")
                .long("retry-backoff-ms")
                .help_heading("HTTP")
                .help("Retry backoff base in milliseconds")
                .default_value("400")
                .global(true)
                .num_args(1),
        )
    }

    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut HostConfig) -> anyhow::Result<()> {
        if let Some(url) = get_arg(matches, "http_api_url") {
            cfg.client_ctx.api_url = url.trim().to_string();
        }
        if let Some(ua) = get_arg(matches, "http_user_agent") {
            cfg.client_ctx.user_agent = ua.clone();
        }
        if let Some(s) = get_arg(matches, "http_timeout_secs") {
            cfg.client_ctx.timeout_secs = s.parse()?;
        }
        if let Some(s) = get_arg(matches, "http_retries") {
            cfg.client_ctx.retries = s.parse()?;
        }
        if let Some(s) = get_arg(matches, "http_retry_backoff_ms") {
            cfg.client_ctx.retry_backoff_ms = s.parse()?;
        }
        Ok(())
    }
}
