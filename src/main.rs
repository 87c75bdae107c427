//! Application entry point: voice assistant core console.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Open the audio session: output first, input optional.
//! 5. Spawn the ducking coordinator on a speech-event channel.
//! 6. Start the timer scheduler with a [`ReminderDispatcher`] that speaks
//!    through the session.
//! 7. Read console commands from stdin until `quit` or EOF.
//!
//! # Console commands
//!
//! ```text
//! timer <secs> [text]        reminder after <secs>
//! volume <secs> <0-100>      set the media app's volume after <secs>
//! cancel <id>                cancel a pending countdown
//! list                       active countdowns as JSON
//! speak | done               simulate assistant speech start / end
//! quit
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use voice_assistant_core::{
    audio::{AudioSession, CpalBackend, Direction},
    config::AppConfig,
    ducking::{DuckingCoordinator, MediaVolume, NullMixer, PactlMixer, SpeechEvent},
    timer::{Announcer, CountdownTools, ReminderDispatcher, TimerScheduler, ToolInvoker},
};

// ---------------------------------------------------------------------------
// Console commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Timer { secs: u64, text: String },
    Volume { secs: u64, percent: u8 },
    Cancel(u64),
    List,
    Speak,
    Done,
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let number = |word: Option<&str>, what: &str| -> Result<u64, String> {
            word.ok_or_else(|| format!("missing {what}"))?
                .parse::<u64>()
                .map_err(|e| format!("bad {what}: {e}"))
        };

        let cmd = match verb {
            "timer" => {
                let secs = number(words.next(), "seconds")?;
                let text = words.collect::<Vec<_>>().join(" ");
                ConsoleCommand::Timer { secs, text }
            }
            "volume" => {
                let secs = number(words.next(), "seconds")?;
                let percent = number(words.next(), "volume")?;
                if percent > 100 {
                    return Err(format!("volume {percent} is above 100"));
                }
                ConsoleCommand::Volume {
                    secs,
                    percent: percent as u8,
                }
            }
            "cancel" => ConsoleCommand::Cancel(number(words.next(), "timer id")?),
            "list" => ConsoleCommand::List,
            "speak" => ConsoleCommand::Speak,
            "done" => ConsoleCommand::Done,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command {other:?}")),
        };
        Ok(Some(cmd))
    }
}

// ---------------------------------------------------------------------------
// SpeakerAnnouncer: reminders become a chime on the output channel
// ---------------------------------------------------------------------------

const CHIME_HZ: f32 = 880.0;
const CHIME_LEN: Duration = Duration::from_millis(300);

struct SpeakerAnnouncer {
    session: Arc<AudioSession>,
    speech_tx: mpsc::Sender<SpeechEvent>,
    guard: Duration,
}

impl SpeakerAnnouncer {
    /// Interleaved sine chime in the playback stream's format.
    fn chime(&self) -> Vec<f32> {
        let (rate, channels) = self
            .session
            .output()
            .format()
            .map(|f| (f.sample_rate, f.channels as usize))
            .unwrap_or((48_000, 2));
        let frames = (rate as f32 * CHIME_LEN.as_secs_f32()) as usize;

        let mut out = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let t = i as f32 / rate as f32;
            // Linear fade-out avoids a click at the end.
            let envelope = 1.0 - i as f32 / frames as f32;
            let sample = (t * CHIME_HZ * std::f32::consts::TAU).sin() * 0.3 * envelope;
            out.extend(std::iter::repeat(sample).take(channels));
        }
        out
    }
}

#[async_trait]
impl Announcer for SpeakerAnnouncer {
    async fn announce(&self, text: &str) -> anyhow::Result<()> {
        println!("[reminder] {text}");

        self.speech_tx
            .send(SpeechEvent::Started)
            .await
            .context("ducking coordinator stopped")?;

        match self.session.write_output(&self.chime()) {
            Ok(_) => tokio::time::sleep(CHIME_LEN).await,
            Err(e) => log::warn!("reminder chime not played: {e}"),
        }

        self.speech_tx
            .send(SpeechEvent::Ended)
            .await
            .context("ducking coordinator stopped")?;
        self.session.suppress_input_for(self.guard);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MediaTools: tools a countdown may run when it fires
// ---------------------------------------------------------------------------

struct MediaTools {
    mixer: Arc<dyn MediaVolume>,
    app_name: String,
}

#[async_trait]
impl ToolInvoker for MediaTools {
    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        match name {
            "media.set_volume" => {
                let percent = arguments
                    .get("volume")
                    .and_then(|v| v.as_u64())
                    .context("media.set_volume needs an integer \"volume\"")?;
                let volume = percent.min(100) as f32 / 100.0;

                let mixer = Arc::clone(&self.mixer);
                let app = self.app_name.clone();
                let applied =
                    tokio::task::spawn_blocking(move || mixer.set_volume(&app, volume))
                        .await??;
                Ok(json!({ "success": applied, "volume": percent }))
            }
            other => anyhow::bail!("unknown tool {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Input monitor
// ---------------------------------------------------------------------------

/// Drain captured audio so the capture channel never backs up.
async fn monitor_input(session: Arc<AudioSession>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let mut frames: u64 = 0;
    loop {
        ticker.tick().await;
        while let Some(chunk) = session.read_input() {
            frames += (chunk.samples.len() / chunk.channels.max(1) as usize) as u64;
            if frames >= u64::from(chunk.sample_rate) * 10 {
                let peak = chunk.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
                log::debug!("microphone alive, last chunk peak {peak:.3}");
                frames = 0;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Console loop
// ---------------------------------------------------------------------------

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // Audio session
    let session = Arc::new(AudioSession::new(Arc::new(CpalBackend::from_config(
        &config.audio,
    ))));
    if let Err(e) = session.start() {
        log::warn!("speech output unavailable ({e}); reminders will be text only");
    }
    log::info!(
        "audio session: input {}, output {}",
        session.input_state().label(),
        session.output_state().label()
    );

    // Ducking
    let mixer: Arc<dyn MediaVolume> = if config.ducking.enabled {
        Arc::new(PactlMixer::default())
    } else {
        Arc::new(NullMixer)
    };
    let ducking = Arc::new(DuckingCoordinator::from_config(
        &config.ducking,
        Arc::clone(&mixer),
    ));
    let (speech_tx, speech_rx) = mpsc::channel::<SpeechEvent>(16);
    let ducking_task = tokio::spawn(Arc::clone(&ducking).run(speech_rx));

    // Timers
    let announcer = SpeakerAnnouncer {
        session: Arc::clone(&session),
        speech_tx: speech_tx.clone(),
        guard: config.audio.post_speech_guard(),
    };
    let tools = MediaTools {
        mixer,
        app_name: config.ducking.app_name.clone(),
    };
    let dispatcher = ReminderDispatcher::new(Arc::new(announcer)).with_tools(Arc::new(tools));
    let scheduler = Arc::new(TimerScheduler::start(Arc::new(dispatcher)));
    let countdowns = CountdownTools::new(Arc::clone(&scheduler), config.timer.clone());

    let monitor = tokio::spawn(monitor_input(Arc::clone(&session)));

    println!("commands: timer <secs> [text] | volume <secs> <0-100> | cancel <id> | list | speak | done | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let cmd = match ConsoleCommand::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("error: {e}");
                continue;
            }
        };

        match cmd {
            ConsoleCommand::Timer { secs, text } => {
                match countdowns.start_countdown("{}", Some(secs), &text) {
                    Ok(started) => println!("{}", started.message),
                    Err(e) => println!("error: {e}"),
                }
            }
            ConsoleCommand::Volume { secs, percent } => {
                let command =
                    json!({ "name": "media.set_volume", "arguments": { "volume": percent } });
                let description = format!("{} volume set to {percent}%", config.ducking.app_name);
                match countdowns.start_countdown(&command.to_string(), Some(secs), &description) {
                    Ok(started) => println!("{}", started.message),
                    Err(e) => println!("error: {e}"),
                }
            }
            ConsoleCommand::Cancel(id) => println!("{}", countdowns.cancel_countdown(id).message),
            ConsoleCommand::List => {
                println!("{}", serde_json::to_string_pretty(&countdowns.get_active_timers())?)
            }
            ConsoleCommand::Speak => speech_tx.send(SpeechEvent::Started).await?,
            ConsoleCommand::Done => speech_tx.send(SpeechEvent::Ended).await?,
            ConsoleCommand::Quit => break,
        }
    }

    // Shutdown: timers first so no reminder races the teardown.
    scheduler.shutdown();
    scheduler.join().await;
    monitor.abort();

    // The dispatcher owns the remaining speech-event senders.
    drop(countdowns);
    drop(scheduler);
    drop(speech_tx);
    if let Err(e) = ducking_task.await {
        log::error!("ducking task failed: {e}");
    }

    // Leave the media app where the user had it.
    if ducking.currently_ducked() {
        let ducking = Arc::clone(&ducking);
        tokio::task::spawn_blocking(move || {
            while ducking.depth() > 0 {
                ducking.on_speech_end();
            }
        })
        .await?;
    }

    session.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice assistant core starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    for direction in [Direction::Input, Direction::Output] {
        match CpalBackend::list_devices(direction) {
            Ok(names) => log::info!("{direction} devices: {}", names.join(", ")),
            Err(e) => log::warn!("could not list {direction} devices: {e}"),
        }
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config))
}
