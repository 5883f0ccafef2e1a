//! Render debounce scheduling.
//!
//! Two timers race for one transition. The quiet-period timer is re-armed
//! whenever the page goes idle and cancelled by any new request; the hard
//! deadline is armed once after page-open and never cancelled. Whichever
//! fires first moves the [`CaptureGate`] from `AwaitingStability` to
//! `Rendering`; every later attempt is a no-op. A deadline firing also arms
//! the safety timer that bounds the render pass itself.

use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::{sleep, Sleep};
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::tracker::Activity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    AwaitingStability = 0,
    Rendering = 1,
    Finished = 2,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CaptureState::AwaitingStability,
            1 => CaptureState::Rendering,
            _ => CaptureState::Finished,
        }
    }
}

/// Single-fire gate. Transitions are compare-and-set, so concurrent
/// triggers cannot both win.
#[derive(Debug)]
pub struct CaptureGate(AtomicU8);

impl Default for CaptureGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureGate {
    pub fn new() -> Self {
        Self(AtomicU8::new(CaptureState::AwaitingStability as u8))
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: CaptureState, to: CaptureState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `AwaitingStability -> Rendering`. True for exactly one caller.
    pub fn begin_render(&self) -> bool {
        self.transition(CaptureState::AwaitingStability, CaptureState::Rendering)
    }

    /// `AwaitingStability -> Finished`, skipping the render pass.
    pub fn abandon(&self) -> bool {
        self.transition(CaptureState::AwaitingStability, CaptureState::Finished)
    }

    /// `Rendering -> Finished`.
    pub fn finish(&self) -> bool {
        self.transition(CaptureState::Rendering, CaptureState::Finished)
    }
}

/// A one-shot timer that can be re-armed. Arming replaces any pending fire.
#[derive(Debug, Default)]
pub struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(sleep(after)));
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves when the armed timer expires; pends forever when disarmed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(s) => s.as_mut().await,
            None => pending::<()>().await,
        }
        self.sleep = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    QuietPeriod,
    HardDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// This trigger won the gate; run the render pass.
    Render(Trigger),
    /// The gate had already moved on.
    Ignored(Trigger),
    /// The render pass outlived the safety timer.
    SafetyExpired,
}

#[derive(Debug)]
pub struct RenderScheduler {
    gate: CaptureGate,
    quiet_period: Duration,
    hard_deadline: Duration,
    quiet: Timer,
    deadline: Timer,
    deadline_armed: bool,
    safety: Timer,
}

impl RenderScheduler {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            gate: CaptureGate::new(),
            quiet_period: config.quiet_period,
            hard_deadline: config.hard_deadline,
            quiet: Timer::default(),
            deadline: Timer::default(),
            deadline_armed: false,
            safety: Timer::default(),
        }
    }

    pub fn gate(&self) -> &CaptureGate {
        &self.gate
    }

    pub fn quiet_armed(&self) -> bool {
        self.quiet.is_armed()
    }

    /// Feeds the tracker's verdict on the latest lifecycle event.
    pub fn on_activity(&mut self, activity: Activity) {
        match activity {
            Activity::Busy => self.quiet.cancel(),
            Activity::Idle => {
                debug!(quiet_ms = self.quiet_period.as_millis() as u64, "page idle, arming quiet period");
                self.quiet.arm(self.quiet_period);
            }
            Activity::Unchanged => {}
        }
    }

    /// Arms the hard deadline. Only the first call has any effect.
    pub fn arm_deadline(&mut self) {
        if self.deadline_armed {
            return;
        }
        self.deadline_armed = true;
        self.deadline.arm(self.hard_deadline);
    }

    /// Waits for the next timer to fire and resolves its effect on the gate.
    pub async fn next_tick(&mut self) -> Tick {
        // Ties resolve quiet first, then deadline, then safety.
        tokio::select! {
            biased;

            _ = self.quiet.fired() => self.fire(Trigger::QuietPeriod),
            _ = self.deadline.fired() => {
                if !self.safety.is_armed() {
                    self.safety.arm(self.hard_deadline);
                }
                self.fire(Trigger::HardDeadline)
            }
            _ = self.safety.fired() => Tick::SafetyExpired,
        }
    }

    fn fire(&self, trigger: Trigger) -> Tick {
        if self.gate.begin_render() {
            if trigger == Trigger::HardDeadline {
                warn!("hard deadline reached, forcing render");
            }
            Tick::Render(trigger)
        } else {
            debug!(?trigger, state = ?self.gate.state(), "trigger ignored");
            Tick::Ignored(trigger)
        }
    }
}
