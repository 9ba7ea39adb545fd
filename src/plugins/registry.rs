use async_trait::async_trait;
use crate::tracking::events::MediaEvent;
use crate::tracking::model::{HistoryUpdate, PlaybackHistory};
use clap::{ArgMatches, Command};
use tokio::sync::broadcast;

/// Remote side of the tracker: the only call it ever makes.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn update_history(&self, episode_id: &str, update: &HistoryUpdate) -> anyhow::Result<PlaybackHistory>;
}

/// Minimal capability surface of an audio element.
pub trait MediaElement: Send + Sync {
    fn current_time(&self) -> f64;

    /// Programmatic position change. Does not emit `Seeked`; that event is reserved for user scrubs.
    fn set_current_time(&self, secs: f64);

    fn duration(&self) -> Option<f64>;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;
}

#[derive(Debug, Clone)]
pub struct ClientContext {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api".to_string(),
            user_agent: "podtrack/0.1".to_string(),
            timeout_secs: 30,
            retries: 2,
            retry_backoff_ms: 400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub speed: f64,
    pub autoplay: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self { speed: 1.0, autoplay: false }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub client_ctx: ClientContext,
    pub playback: PlaybackOptions,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Arguments shared by every subcommand.
    fn augment_root_command(&self, cmd: Command) -> Command {
        cmd
    }

    fn augment_play_command(&self, cmd: Command) -> Command {
        cmd
    }

    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut HostConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { cli_plugins: vec![] };
        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        reg.cli_plugins.push(Box::new(crate::plugins::media::cli::MediaCliPlugin::new()));
        reg
    }

    pub fn augment_root_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_root_command(c))
    }

    pub fn augment_play_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_play_command(c))
    }

    pub fn apply_matches(&self, matches: &ArgMatches, cfg: &mut HostConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            tracing::trace!(plugin = p.name(), "applying cli matches");
            p.apply_matches(matches, cfg)?;
        }
        Ok(())
    }
}
