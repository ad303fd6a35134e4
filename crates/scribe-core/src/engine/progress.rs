use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

/// Phases of a transcription run, in the order the tool moves through them.
///
/// Each phase owns a percentage band; explicit `Progress: NN%` lines
/// interpolate inside the current band. The mapping is a contract of
/// monotonic, phase-labelled progress, not an exact trace of the tool's
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    LoadingModel,
    ModelLoaded,
    Transcribing,
    Aligning,
    Diarizing,
    Finalizing,
}

impl Phase {
    fn band(self) -> (u8, u8) {
        match self {
            Phase::LoadingModel => (0, 10),
            Phase::ModelLoaded => (10, 15),
            Phase::Transcribing => (15, 60),
            Phase::Aligning => (60, 80),
            Phase::Diarizing => (80, 95),
            Phase::Finalizing => (95, 100),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Phase::LoadingModel => "Loading WhisperX model",
            Phase::ModelLoaded => "Model loaded",
            Phase::Transcribing => "Transcribing audio",
            Phase::Aligning => "Aligning transcription",
            Phase::Diarizing => "Speaker diarization",
            Phase::Finalizing => "Finalizing output",
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        if line.contains("loading model") {
            Some(Phase::LoadingModel)
        } else if line.contains("model loaded") {
            Some(Phase::ModelLoaded)
        } else if line.contains("transcribing") {
            Some(Phase::Transcribing)
        } else if line.contains("aligning") {
            Some(Phase::Aligning)
        } else if line.contains("diarizing") {
            Some(Phase::Diarizing)
        } else if line.contains("saving") || line.contains("writing output") {
            Some(Phase::Finalizing)
        } else {
            None
        }
    }
}

/// One progress observation derived from a tool output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub step: &'static str,
    pub eta: Option<DateTime<Utc>>,
}

/// Maps the transcription tool's output lines to banded, non-decreasing
/// progress percentages with phase labels.
///
/// The tracker never reports a value lower than one it already reported, so
/// out-of-order or repeated tool output cannot move a task backwards. Once
/// overall progress passes 15% it also derives an advisory completion
/// estimate from elapsed wall time.
#[derive(Debug)]
pub struct ProgressTracker {
    phase: Phase,
    last: u8,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            phase: Phase::LoadingModel,
            last: 0,
            started: Instant::now(),
        }
    }

    /// Inspect one output line; `Some` when the line carries progress.
    pub fn observe(&mut self, line: &str) -> Option<Progress> {
        let lower = line.to_ascii_lowercase();

        if let Some(phase) = Phase::from_line(&lower) {
            // Markers only ever advance the phase; stale banner lines from
            // the tool must not rewind it.
            if phase > self.phase {
                self.phase = phase;
            }
            return Some(self.report(self.phase.band().0));
        }

        if let Some(pct) = parse_percent(line) {
            let (lo, hi) = self.phase.band();
            let scaled = f64::from(lo) + f64::from(hi - lo) * (pct / 100.0);
            return Some(self.report(scaled.round() as u8));
        }

        if let Some((done, total)) = parse_segment(line) {
            if self.phase < Phase::Transcribing {
                self.phase = Phase::Transcribing;
            }
            if self.phase == Phase::Transcribing {
                let (lo, hi) = self.phase.band();
                let frac = done as f64 / total as f64;
                let scaled = f64::from(lo) + f64::from(hi - lo) * frac.min(1.0);
                return Some(self.report(scaled.round() as u8));
            }
        }

        None
    }

    fn report(&mut self, candidate: u8) -> Progress {
        self.last = self.last.max(candidate.min(100));
        Progress {
            percent: self.last,
            step: self.phase.label(),
            eta: self.estimate(),
        }
    }

    /// Completion estimate from elapsed time, meaningful only after the
    /// run is past its model-loading bands.
    fn estimate(&self) -> Option<DateTime<Utc>> {
        if self.last <= 15 {
            return None;
        }
        let elapsed = self.started.elapsed();
        let estimated_total = elapsed.mul_f64(100.0 / f64::from(self.last));
        let remaining = estimated_total.saturating_sub(elapsed);
        let remaining = Duration::from_std(remaining).ok()?;
        Some(Utc::now() + remaining)
    }
}

fn parse_percent(line: &str) -> Option<f64> {
    let idx = line.find("Progress:")?;
    let rest = line[idx + "Progress:".len()..].trim_start();
    let end = rest.find('%')?;
    let pct: f64 = rest[..end].trim().parse().ok()?;
    if pct.is_finite() && (0.0..=100.0).contains(&pct) {
        Some(pct)
    } else {
        None
    }
}

fn parse_segment(line: &str) -> Option<(u64, u64)> {
    let lower = line.to_ascii_lowercase();
    let idx = lower.find("segment")?;
    let rest = lower[idx + "segment".len()..].trim_start();
    let slash = rest.find('/')?;
    let done: u64 = rest[..slash].trim().parse().ok()?;
    let after = &rest[slash + 1..];
    let digits = after
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after.len());
    let total: u64 = after[..digits].parse().ok()?;
    if total == 0 {
        return None;
    }
    Some((done.min(total), total))
}
