mod tracking;
mod plugins;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracking::events::TrackerEvent;
use tracking::model::{HistoryUpdate, PlaybackHistory, PlayingStatus};
use tracking::session::drive;
use tracking::tracker::{Binding, PlaybackTracker};
use indicatif::{ProgressBar, ProgressStyle};
use plugins::http::client::ApiClient;
use plugins::media::simulated::{SimulatedAudio, JUMP_STEP_SECS, PLAYBACK_SPEEDS};
use plugins::registry::{HostConfig, MediaElement, PluginRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_DRAIN: Duration = Duration::from_secs(5);

fn build_cli(registry: &PluginRegistry) -> Command {
    let episode_arg = || {
        Arg::new("episode")
            .help("Episode UUID")
            .required(true)
            .num_args(1)
    };

    let play = Command::new("play")
        .about("Play an episode and keep its listening history in sync")
        .arg(episode_arg());
    let play = registry.augment_play_command(play);

    let history = Command::new("history")
        .about("Show the listening history of an episode")
        .arg(episode_arg());

    let mark = Command::new("mark")
        .about("Set the playing status of an episode")
        .arg(episode_arg())
        .arg(
            Arg::new("status")
                .long("status")
                .help("New playing status")
                .value_parser(["not-played", "in-progress", "completed"])
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("position")
                .long("position")
                .help("Position in seconds (defaults to the saved position)")
                .num_args(1),
        );

    let sessions = Command::new("sessions")
        .about("List play sessions of an episode")
        .arg(episode_arg())
        .arg(
            Arg::new("limit")
                .long("limit")
                .help("Maximum number of sessions")
                .default_value("20")
                .num_args(1),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .help("Do not limit the number of sessions")
                .action(ArgAction::SetTrue),
        );

    let root = Command::new("podtrack")
        .about("Podcast listening tracker - plays episodes and syncs playback position")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(play)
        .subcommand(history)
        .subcommand(mark)
        .subcommand(sessions);
    registry.augment_root_command(root)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,podtrack=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();

    let Some((name, m)) = matches.subcommand() else {
        return Ok(());
    };
    let mut cfg = HostConfig::default();
    registry.apply_matches(m, &mut cfg)?;
    let client = Arc::new(ApiClient::new(cfg.client_ctx.clone()).context("build api client")?);
    let episode_id = m
        .get_one::<String>("episode")
        .context("missing episode id")?
        .clone();

    match name {
        "play" => run_play(client, &episode_id, &cfg).await,
        "history" => run_history(&client, &episode_id).await,
        "mark" => run_mark(&client, &episode_id, m).await,
        "sessions" => run_sessions(&client, &episode_id, m).await,
        _ => Ok(()),
    }
}

async fn run_play(client: Arc<ApiClient>, episode_id: &str, cfg: &HostConfig) -> anyhow::Result<()> {
    let episode = client
        .get_episode(episode_id)
        .await
        .with_context(|| format!("fetch episode {}", episode_id))?;
    let history = client
        .get_history(episode_id)
        .await
        .with_context(|| format!("fetch history of {}", episode_id))?;

    let mut audio_slot: Option<Arc<SimulatedAudio>> = None;
    let binding = PlaybackTracker::bind(&episode, history, client.clone(), |src, duration| {
        let audio = Arc::new(SimulatedAudio::new(src, duration));
        audio_slot = Some(audio.clone());
        audio as Arc<dyn MediaElement>
    });
    let (tracker, audio) = match (binding, audio_slot) {
        (Binding::Tracker(t), Some(a)) => (Arc::new(t), a),
        _ => {
            println!("No audio link available for this episode.");
            return Ok(());
        }
    };

    println!("{}", episode.display_title());
    println!("source: {}", audio.src());
    println!("commands: p play/pause | s <secs> seek | f/b jump {}s | r <rate> speed | q quit", JUMP_STEP_SECS);

    let pb = ProgressBar::new(episode.known_duration().map(|d| d as u64).unwrap_or(0));
    let style = if episode.known_duration().is_some() {
        ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {msg}")?
    } else {
        ProgressStyle::with_template("{spinner:.green} {prefix} {msg}")?
    };
    pb.set_style(style);
    pb.set_prefix(format!("[{}]", tracker.status().label()));

    // history notifications: refetch on request, adopt returned records
    let notify_task = {
        let tracker = tracker.clone();
        let client = client.clone();
        let pb = pb.clone();
        let mut rx = tracker.subscribe();
        tokio::spawn(async move {
            while let Ok(TrackerEvent::HistoryUpdated(h)) = rx.recv().await {
                let fresh = match h {
                    Some(h) => Some(h),
                    None => match client.get_history(tracker.episode_id()).await {
                        Ok(h) => h,
                        Err(e) => {
                            warn!(error = %e, "history refetch failed");
                            None
                        }
                    },
                };
                if let Some(h) = fresh {
                    pb.set_prefix(format!("[{}]", h.playing_status.label()));
                    tracker.apply_history(h);
                }
            }
        })
    };

    let render_task = {
        let audio = audio.clone();
        let pb = pb.clone();
        tokio::spawn(async move {
            let mut iv = tokio::time::interval(Duration::from_millis(500));
            loop {
                iv.tick().await;
                let pos = audio.current_time();
                pb.set_position(pos as u64);
                pb.set_message(format!(
                    "{} / {} | {}x{}",
                    fmt_secs(pos),
                    audio.duration().map(fmt_secs).unwrap_or_else(|| "?".to_string()),
                    audio.playback_rate(),
                    if audio.is_playing() { "" } else { " (paused)" },
                ));
            }
        })
    };

    let events = audio.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let driver = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            drive(&tracker, events, async {
                let _ = stop_rx.await;
            })
            .await;
        })
    };

    audio.set_playback_rate(cfg.playback.speed);
    audio.start();
    if cfg.playback.autoplay {
        audio.play();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let line = match line? {
                    Some(l) => l,
                    None => break,
                };
                match handle_command(&audio, line.trim()) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => pb.println(format!("error: {:#}", e)),
                }
            }
        }
    }

    audio.pause();
    audio.close();
    let _ = stop_tx.send(());
    driver.await.context("session driver")?;
    render_task.abort();
    notify_task.abort();
    tracker.drain(EXIT_DRAIN).await;
    pb.finish_with_message(format!("stopped at {}", fmt_secs(tracker.position())));
    info!(session = %tracker.session_id(), "bye");
    Ok(())
}

/// Returns `Ok(true)` when the user asked to quit.
fn handle_command(audio: &SimulatedAudio, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("q"), _) => return Ok(true),
        (Some("p"), _) => audio.toggle(),
        (Some("f"), _) => audio.jump(JUMP_STEP_SECS),
        (Some("b"), _) => audio.jump(-JUMP_STEP_SECS),
        (Some("s"), Some(v)) => audio.seek(parse_secs(v)?),
        (Some("r"), Some(v)) => {
            let rate: f64 = v.trim_end_matches('x').parse()?;
            if !PLAYBACK_SPEEDS.iter().any(|s| (s - rate).abs() < f64::EPSILON) {
                anyhow::bail!("unsupported speed {}x", rate);
            }
            audio.set_playback_rate(rate);
        }
        (Some(cmd), _) => anyhow::bail!("unknown command: {}", cmd),
    }
    Ok(false)
}

async fn run_history(client: &ApiClient, episode_id: &str) -> anyhow::Result<()> {
    match client.get_history(episode_id).await? {
        Some(h) => print_history(&h),
        None => println!("no listening history for {}", episode_id),
    }
    Ok(())
}

async fn run_mark(client: &ApiClient, episode_id: &str, m: &ArgMatches) -> anyhow::Result<()> {
    let status = match m.get_one::<String>("status").map(String::as_str) {
        Some("in-progress") => PlayingStatus::InProgress,
        Some("completed") => PlayingStatus::Completed,
        _ => PlayingStatus::NotPlayed,
    };
    let episode = client.get_episode(episode_id).await?;
    let position = match m.get_one::<String>("position") {
        Some(v) => parse_secs(v)?,
        None => client
            .get_history(episode_id)
            .await?
            .map(|h| h.played_up_to)
            .unwrap_or(0.0),
    };

    let update = HistoryUpdate {
        played_up_to: position,
        duration: episode.known_duration(),
        playing_status: status,
    };
    let h = client
        .put_history(episode_id, &update)
        .await
        .with_context(|| format!("update history of {}", episode_id))?;
    print_history(&h);
    Ok(())
}

async fn run_sessions(client: &ApiClient, episode_id: &str, m: &ArgMatches) -> anyhow::Result<()> {
    let limit = if m.get_flag("all") {
        None
    } else {
        m.get_one::<String>("limit").map(|s| s.parse::<u32>()).transpose()?
    };
    let sessions = client.get_sessions(episode_id, limit).await?;
    if sessions.is_empty() {
        println!("no play sessions for {}", episode_id);
    }
    for s in sessions {
        println!(
            "{}  {} -> {}  ({})",
            s.started_at,
            fmt_secs(s.played_from),
            fmt_secs(s.played_to),
            s.duration_seconds.map(fmt_secs).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn print_history(h: &PlaybackHistory) {
    println!("episode:    {}", h.episode_uuid);
    println!("status:     {}", h.playing_status.label());
    println!(
        "position:   {} / {}",
        fmt_secs(h.played_up_to),
        h.duration.filter(|d| *d > 0.0).map(fmt_secs).unwrap_or_else(|| "?".to_string())
    );
    if let Some(p) = h.completion_percentage {
        println!("completion: {:.0}%", p);
    }
    if let Some(first) = &h.first_played_at {
        println!("first:      {}", first);
    }
    if let Some(last) = &h.last_played_at {
        println!("last:       {}", last);
    }
    if let Some(n) = h.play_count {
        println!("plays:      {}", n);
    }
}

/// Accepts `90`, `1:30` or `1:01:30`.
fn parse_secs(raw: &str) -> anyhow::Result<f64> {
    let mut total = 0.0;
    for part in raw.trim().split(':') {
        let v: f64 = part.parse().with_context(|| format!("invalid time: {}", raw))?;
        if v < 0.0 {
            anyhow::bail!("invalid time: {}", raw);
        }
        total = total * 60.0 + v;
    }
    Ok(total)
}

fn fmt_secs(secs: f64) -> String {
    let s = secs.max(0.0).round() as u64;
    let (h, m, s) = (s / 3600, (s % 3600) / 60, s % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
