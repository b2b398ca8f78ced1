//! TransitionEngine - smooth fades for level and pan changes
//!
//! A fade is precomputed into a queue of encoded wire values when it starts.
//! One shared timer advances every active fade by one step per tick, so the
//! wire never sees more than `fps` writes per second per address.
//!
//! The engine does no I/O: `run` and `tick` hand back the writes and the
//! session actor sends them. The timer is a deadline the actor sleeps on; it
//! exists exactly while at least one fade is active.

mod easing;

pub use easing::Easing;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::levels;
use crate::osc::OscArg;

/// Default fade frame rate
pub const DEFAULT_FPS: u32 = 10;
/// Accepted frame rate range
pub const MIN_FPS: u32 = 5;
pub const MAX_FPS: u32 = 60;
/// Longest fade the engine will schedule; longer durations are clamped
pub const MAX_FADE_MS: u64 = 10 * 60 * 1000;

/// How interpolated values are turned into wire floats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Values are already wire floats (pan, sends in linear mode)
    Linear,
    /// Values are dB and go through the fader law
    Decibel,
}

impl ValueEncoding {
    pub fn encode(self, value: f64) -> OscArg {
        match self {
            ValueEncoding::Linear => OscArg::Float(value as f32),
            ValueEncoding::Decibel => OscArg::Float(levels::db_to_float(value)),
        }
    }

    /// Read a cached wire value back into this encoding's domain.
    /// A closed fader decodes to the bottom of the dB range, not `-inf`.
    pub fn decode(self, arg: &OscArg) -> Option<f64> {
        let raw = arg.as_f32()?;
        match self {
            ValueEncoding::Linear => Some(f64::from(raw)),
            ValueEncoding::Decibel => Some(levels::clamp_db(levels::float_to_db(raw))),
        }
    }
}

/// What `run` decided to do
#[derive(Debug, Clone, PartialEq)]
pub enum FadeStart {
    /// No interpolation; the caller sends this value now
    Immediate(OscArg),
    /// A fade of `steps` writes was installed
    Scheduled { steps: usize },
}

#[derive(Debug)]
struct FadeTimer {
    next: Instant,
}

pub struct TransitionEngine {
    fps: u32,
    easing: Easing,
    /// Remaining encoded steps per address
    transitions: HashMap<String, VecDeque<OscArg>>,
    timer: Option<FadeTimer>,
}

impl TransitionEngine {
    /// `fps` is clamped into the supported range
    pub fn new(fps: u32, easing: Easing) -> Self {
        Self {
            fps: fps.clamp(MIN_FPS, MAX_FPS),
            easing,
            transitions: HashMap::new(),
            timer: None,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Tick period (1000 / fps ms)
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }

    /// Number of steps a fade of `duration_ms` takes: ceil(duration / period).
    /// Durations beyond [`MAX_FADE_MS`] count as `MAX_FADE_MS`.
    pub fn step_count(&self, duration_ms: u64) -> u64 {
        duration_ms
            .min(MAX_FADE_MS)
            .saturating_mul(u64::from(self.fps))
            .div_ceil(1000)
    }

    /// Start (or restart) a fade of `address` from `from` to `to`.
    ///
    /// Values are in the encoding's domain (dB for `Decibel`). An unknown
    /// start or a fade too short for two steps degrades to a single write.
    pub fn run(
        &mut self,
        address: &str,
        from: Option<f64>,
        to: f64,
        duration_ms: u64,
        encoding: ValueEncoding,
        now: Instant,
    ) -> FadeStart {
        if duration_ms > MAX_FADE_MS {
            debug!(address, duration_ms, "Fade clamped to {} ms", MAX_FADE_MS);
        }
        let step_count = self.step_count(duration_ms);

        let from = match from {
            Some(from) if step_count > 1 && from.is_finite() => from,
            _ => {
                if self.transitions.remove(address).is_some() {
                    debug!(address, "Replaced running fade with immediate write");
                }
                self.stop_timer_if_idle();
                return FadeStart::Immediate(encoding.encode(to));
            }
        };

        let diff = to - from;
        let mut steps: VecDeque<OscArg> = (1..step_count)
            .map(|i| {
                let progress = self.easing.apply(i as f64 / step_count as f64);
                encoding.encode(from + diff * progress)
            })
            .collect();
        // Land exactly on the target regardless of rounding
        steps.push_back(encoding.encode(to));

        let count = steps.len();
        if self.transitions.insert(address.to_string(), steps).is_some() {
            debug!(address, "Fade restarted");
        }
        trace!(address, from, to, steps = count, "Fade installed");

        if self.timer.is_none() {
            self.timer = Some(FadeTimer {
                next: now + self.period(),
            });
            trace!("Fade timer started");
        }

        FadeStart::Scheduled { steps: count }
    }

    /// Advance every fade by one step and return the writes to send.
    pub fn tick(&mut self, now: Instant) -> Vec<(String, OscArg)> {
        let mut writes = Vec::with_capacity(self.transitions.len());
        let mut completed = Vec::new();

        for (address, steps) in self.transitions.iter_mut() {
            if let Some(value) = steps.pop_front() {
                writes.push((address.clone(), value));
            }
            if steps.is_empty() {
                completed.push(address.clone());
            }
        }

        for address in completed {
            self.transitions.remove(&address);
            trace!(address = %address, "Fade complete");
        }

        let period = self.period();
        if self.transitions.is_empty() {
            self.timer = None;
            trace!("Fade timer stopped");
        } else if let Some(timer) = self.timer.as_mut() {
            timer.next += period;
            if timer.next <= now {
                // Fell behind; keep the spacing instead of bursting
                timer.next = now + period;
            }
        }

        writes
    }

    /// Drop every fade and the timer
    pub fn stop_all(&mut self) {
        if !self.transitions.is_empty() {
            debug!(count = self.transitions.len(), "Stopping all fades");
        }
        self.transitions.clear();
        self.timer = None;
    }

    /// When the shared timer next fires, if it exists
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(|t| t.next)
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn is_active(&self, address: &str) -> bool {
        self.transitions.contains_key(address)
    }

    /// Steps not yet sent for `address`
    pub fn remaining(&self, address: &str) -> usize {
        self.transitions.get(address).map_or(0, VecDeque::len)
    }

    pub fn active_count(&self) -> usize {
        self.transitions.len()
    }

    fn stop_timer_if_idle(&mut self) {
        if self.transitions.is_empty() {
            self.timer = None;
        }
    }
}
