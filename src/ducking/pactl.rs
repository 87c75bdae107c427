//! [`MediaVolume`] for PulseAudio / PipeWire via the `pactl` tool.
//!
//! Each playing stream of an application is a *sink input*.  The mixer lists
//! them with `pactl -f json list sink-inputs`, matches the application by
//! `application.name` or `application.process.binary` (case-insensitive),
//! and writes volumes with `pactl set-sink-input-volume`.  Only the
//! application's own streams are touched; the sink (system) volume is not.
//!
//! A duck writes one level to every stream of the app, so the snapshot
//! taken beforehand records each stream's raw volume (paused and
//! over-amplified streams included) and the restore writes those back per
//! stream.

use std::collections::HashMap;
use std::process::Command;

use serde::Deserialize;

use super::mixer::{check_range, MediaVolume, StreamVolume, VolumeError, VolumeSnapshot};

/// PulseAudio's 100% volume (`PA_VOLUME_NORM`).
const VOLUME_NORM: f32 = 65_536.0;

// ---------------------------------------------------------------------------
// pactl JSON model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SinkInput {
    pub index: u32,
    #[serde(default)]
    pub corked: bool,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub volume: HashMap<String, ChannelVolume>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelVolume {
    pub value: u32,
}

impl SinkInput {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Whether this stream belongs to `app`.
    pub fn belongs_to(&self, app: &str) -> bool {
        ["application.name", "application.process.binary"]
            .iter()
            .filter_map(|key| self.property(key))
            .any(|value| value.eq_ignore_ascii_case(app))
    }

    /// Average of all channel volumes in pactl units, uncapped.
    pub fn raw_volume(&self) -> Option<u32> {
        if self.volume.is_empty() {
            return None;
        }
        let sum: u64 = self.volume.values().map(|c| u64::from(c.value)).sum();
        let avg = (sum as f64 / self.volume.len() as f64).round();
        Some(avg.min(f64::from(u32::MAX)) as u32)
    }

    /// [`raw_volume`](Self::raw_volume) as a linear fraction, capped at 1.0.
    pub fn linear_volume(&self) -> Option<f32> {
        self.raw_volume()
            .map(|raw| (raw as f32 / VOLUME_NORM).min(1.0))
    }
}

/// Parse the output of `pactl -f json list sink-inputs`.
pub fn parse_sink_inputs(json: &str) -> Result<Vec<SinkInput>, VolumeError> {
    Ok(serde_json::from_str(json)?)
}

// ---------------------------------------------------------------------------
// PactlMixer
// ---------------------------------------------------------------------------

/// Per-application mixer backed by the `pactl` command-line tool.
#[derive(Debug, Clone)]
pub struct PactlMixer {
    program: String,
}

impl Default for PactlMixer {
    fn default() -> Self {
        Self::new("pactl")
    }
}

impl PactlMixer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, VolumeError> {
        let output = Command::new(&self.program).args(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VolumeError::Command(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn sink_inputs(&self) -> Result<Vec<SinkInput>, VolumeError> {
        parse_sink_inputs(&self.run(&["-f", "json", "list", "sink-inputs"])?)
    }

    fn set_raw(&self, index: u32, raw: u32) -> Result<(), VolumeError> {
        self.run(&[
            "set-sink-input-volume",
            &index.to_string(),
            &raw.to_string(),
        ])?;
        Ok(())
    }
}

impl MediaVolume for PactlMixer {
    fn get_volume(&self, app: &str) -> Result<Option<f32>, VolumeError> {
        // A paused (corked) stream is not playing anything worth ducking.
        Ok(self
            .sink_inputs()?
            .iter()
            .filter(|s| s.belongs_to(app) && !s.corked)
            .find_map(SinkInput::linear_volume))
    }

    fn set_volume(&self, app: &str, volume: f32) -> Result<bool, VolumeError> {
        let volume = check_range(volume)?;
        let raw = (volume * VOLUME_NORM).round() as u32;

        let mut found = false;
        for input in self.sink_inputs()?.iter().filter(|s| s.belongs_to(app)) {
            self.set_raw(input.index, raw)?;
            found = true;
        }
        Ok(found)
    }

    fn snapshot(&self, app: &str) -> Result<Option<VolumeSnapshot>, VolumeError> {
        let inputs = self.sink_inputs()?;
        let ours: Vec<&SinkInput> = inputs.iter().filter(|s| s.belongs_to(app)).collect();

        let level = ours
            .iter()
            .filter(|s| !s.corked)
            .filter_map(|s| s.linear_volume())
            .reduce(f32::max);
        let Some(level) = level else {
            return Ok(None);
        };

        let streams = ours
            .iter()
            .filter_map(|s| {
                s.raw_volume()
                    .map(|raw| StreamVolume { id: s.index, raw })
            })
            .collect();
        Ok(Some(VolumeSnapshot { level, streams }))
    }

    fn restore(&self, app: &str, snapshot: &VolumeSnapshot) -> Result<bool, VolumeError> {
        if snapshot.streams.is_empty() {
            return self.set_volume(app, check_range(snapshot.level)?);
        }

        // Streams that closed during the episode are skipped.
        let live: Vec<u32> = self
            .sink_inputs()?
            .iter()
            .filter(|s| s.belongs_to(app))
            .map(|s| s.index)
            .collect();
        let mut restored = false;
        for stream in snapshot.streams.iter().filter(|s| live.contains(&s.id)) {
            self.set_raw(stream.id, stream.raw)?;
            restored = true;
        }
        Ok(restored)
    }
}
