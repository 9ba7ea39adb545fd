use crate::plugins::media::simulated::PLAYBACK_SPEEDS;
use crate::plugins::registry::{CliPlugin, HostConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub struct MediaCliPlugin;

impl MediaCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn parse_speed(raw: &str) -> anyhow::Result<f64> {
    let v: f64 = raw.trim().trim_end_matches('x').parse()?;
    if !PLAYBACK_SPEEDS.iter().any(|s| (s - v).abs() < f64::EPSILON) {
        anyhow::bail!("unsupported playback speed {}x (choose one of {:?})", v, PLAYBACK_SPEEDS);
    }
    Ok(v)
}

impl CliPlugin for MediaCliPlugin {
    fn name(&self) -> &'static str {
        "media"
    }

    fn augment_play_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("media_speed")
                .long("speed")
                .help_heading("Playback")
                .help("Initial playback speed: 1, 1.15, 1.25, 1.5, 1.75, 2, 2.5 or 3")
                .default_value("1")
                .num_args(1),
        )
        .arg(
            Arg::new("media_autoplay")
                .long("autoplay")
                .help_heading("Playback")
                .help("Start playing as soon as the episode is loaded")
                .action(ArgAction::SetTrue),
        )
    }

    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut HostConfig) -> anyhow::Result<()> {
        if let Some(s) = matches.try_get_one::<String>("media_speed").ok().flatten() {
            cfg.playback.speed = parse_speed(s)?;
        }
        if let Some(v) = matches.try_get_one::<bool>("media_autoplay").ok().flatten() {
            cfg.playback.autoplay = *v;
        }
        Ok(())
    }
}
