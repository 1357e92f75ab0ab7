//! Brightness transitions
//! Ramps a dimmable device from its last known level to a target over time.
//! Each tick recomputes the level from the elapsed wall clock time, so late
//! ticks catch up instead of accumulating drift.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, trace};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::MAX_TRANSITION_STEPS_PER_SECOND;

/// Receives the brightness commands produced by a transition
pub trait BrightnessSink: Send + Sync {
    /// `None` turns the device on at its previous level, `<= 0` turns it off
    fn set_brightness(&self, device_id: u8, brightness: Option<i32>, should_retry: bool);
}

/// Timing of a ramp between two known levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionPlan {
    pub initial: u8,
    pub target: u8,
    /// Duration in seconds
    pub duration: f64,
    /// `min(|target - initial|, 5 * duration)`, not rounded
    pub steps: f64,
    pub interval: Duration,
}

impl TransitionPlan {
    /// Plans a ramp, or returns `None` when the target should be set directly:
    /// the device is not dimmable, the duration is one second or less, or the
    /// levels are unknown or equal.
    pub fn new(
        dimmable: bool,
        initial: Option<u8>,
        target: Option<i32>,
        duration: f64,
    ) -> Option<Self> {
        let (initial, target) = (initial?, target?);
        if !dimmable || !(duration > 1.0) {
            return None;
        }
        let target = target.clamp(0, 255) as u8;
        if initial == target {
            return None;
        }

        let delta = (target as f64 - initial as f64).abs();
        let steps = delta.min(MAX_TRANSITION_STEPS_PER_SECOND * duration);
        let interval = Duration::from_secs_f64(duration / steps);

        Some(Self {
            initial,
            target,
            duration,
            steps,
            interval,
        })
    }

    /// Level at `elapsed` seconds and whether the ramp is complete.
    /// Elapsed time outside `[0, duration]` counts as complete.
    pub fn brightness_at(&self, elapsed: f64) -> (u8, bool) {
        let elapsed = if elapsed > self.duration || elapsed < 0.0 {
            self.duration
        } else {
            elapsed
        };
        if elapsed >= self.duration {
            return (self.target, true);
        }

        let delta = self.target as f64 - self.initial as f64;
        let level = (self.initial as f64 + delta * elapsed / self.duration) as i32;
        (level.clamp(0, 255) as u8, false)
    }
}

type TimerTable = HashMap<u8, (u64, CancellationToken)>;

/// Per-device transition timers. Starting a transition or setting a level
/// directly cancels the device's running timer.
#[derive(Default)]
pub struct TransitionEngine {
    timers: Arc<Mutex<TimerTable>>,
    generation: AtomicU64,
}

fn lock(timers: &Mutex<TimerTable>) -> MutexGuard<'_, TimerTable> {
    match timers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl TransitionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `device_id` to `target`, ramping when `plan` allows it
    pub fn transition_to(
        &self,
        sink: Arc<dyn BrightnessSink>,
        device_id: u8,
        dimmable: bool,
        initial: Option<u8>,
        target: Option<i32>,
        duration: f64,
    ) {
        self.cancel(device_id);

        let Some(plan) = TransitionPlan::new(dimmable, initial, target, duration) else {
            sink.set_brightness(device_id, target, true);
            return;
        };

        debug!(
            "Transitioning device {} from {} to {} in {}s ({} steps every {:?})",
            device_id, plan.initial, plan.target, plan.duration, plan.steps, plan.interval
        );

        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        lock(&self.timers).insert(device_id, (generation, cancel.clone()));

        let timers = self.timers.clone();
        tokio::spawn(async move {
            run_ramp(sink.as_ref(), device_id, plan, cancel).await;
            let mut timers = lock(&timers);
            if matches!(timers.get(&device_id), Some((g, _)) if *g == generation) {
                timers.remove(&device_id);
            }
        });
    }

    pub fn cancel(&self, device_id: u8) {
        if let Some((_, token)) = lock(&self.timers).remove(&device_id) {
            trace!("Cancelling transition of device {}", device_id);
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for (_, (_, token)) in lock(&self.timers).drain() {
            token.cancel();
        }
    }

    pub fn is_active(&self, device_id: u8) -> bool {
        lock(&self.timers).contains_key(&device_id)
    }
}

async fn run_ramp(
    sink: &dyn BrightnessSink,
    device_id: u8,
    plan: TransitionPlan,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + plan.interval, plan.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let elapsed = start.elapsed().as_secs_f64();
        let (level, done) = plan.brightness_at(elapsed);
        if done {
            sink.set_brightness(device_id, Some(plan.target as i32), true);
            return;
        }
        sink.set_brightness(device_id, Some(level as i32), false);
    }
}
