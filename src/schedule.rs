//! Per-binding poll scheduling.
//!
//! Each binding owns a [`BindingSchedule`], a small state machine:
//!
//! ```text
//! IDLE ──(clock reaches next_trigger)──▶ DUE ──▶ RUNNING ──▶ COMMITTED ──▶ IDLE
//!                                                   │
//!                                                   └──────▶ FAILED ─────▶ IDLE
//! ```
//!
//! There is no global tick: every binding sleeps until its own next
//! trigger, so a 5 minute binding and a daily binding never wait on each
//! other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::PollSchedule;

/// Source of the current time for schedules.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep until `deadline`, returning immediately if it has passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(wait) = (deadline - Utc::now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Poll lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Due,
    Running,
    Committed,
    Failed,
}

/// A transition that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid poll state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: PollState,
    pub to: PollState,
}

/// Result of recording a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry at the next trigger
    Retry { consecutive: u32 },
    /// The consecutive failure limit was reached
    Exhausted { consecutive: u32 },
}

/// Scheduling state of one binding.
#[derive(Debug, Clone)]
pub struct BindingSchedule {
    schedule: PollSchedule,
    state: PollState,
    next_trigger: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
}

impl BindingSchedule {
    /// Create the schedule at startup.
    ///
    /// A binding that never polled is due immediately. One that did is due
    /// at the first trigger after its last successful poll, which may also
    /// be immediately.
    pub fn new(
        schedule: PollSchedule,
        max_consecutive_failures: u32,
        now: DateTime<Utc>,
        last_polled: Option<DateTime<Utc>>,
    ) -> Self {
        let next_trigger = match last_polled {
            Some(t) => schedule.next_after(t).min(schedule.next_after(now)),
            None => now,
        };
        Self {
            schedule,
            state: PollState::Idle,
            next_trigger,
            started_at: None,
            consecutive_failures: 0,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    pub fn schedule(&self) -> PollSchedule {
        self.schedule
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn next_trigger(&self) -> DateTime<Utc> {
        self.next_trigger
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn transition(&mut self, from: PollState, to: PollState) -> Result<(), InvalidTransition> {
        if self.state != from {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// `IDLE → DUE` once the clock reaches the next trigger.
    ///
    /// Returns whether the binding became due.
    pub fn poll_due(&mut self, now: DateTime<Utc>) -> Result<bool, InvalidTransition> {
        if now < self.next_trigger {
            return Ok(false);
        }
        self.transition(PollState::Idle, PollState::Due)?;
        Ok(true)
    }

    /// `DUE → RUNNING`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(PollState::Due, PollState::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// `RUNNING → COMMITTED`, arming the next trigger.
    ///
    /// Interval schedules count from the commit. Daily schedules pick the
    /// first slot after the poll started, so a slot that passed while the
    /// poll was running fires as soon as it completes.
    pub fn commit(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(PollState::Running, PollState::Committed)?;
        self.consecutive_failures = 0;
        self.next_trigger = match self.schedule {
            PollSchedule::Interval(_) => self.schedule.next_after(now),
            PollSchedule::Daily(_) => self.schedule.next_after(self.started_at.unwrap_or(now)),
        };
        Ok(())
    }

    /// `RUNNING → FAILED`, arming a retry at the next natural slot.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<FailureOutcome, InvalidTransition> {
        self.transition(PollState::Running, PollState::Failed)?;
        self.consecutive_failures += 1;
        self.next_trigger = self.schedule.next_after(now);
        let consecutive = self.consecutive_failures;
        if consecutive >= self.max_consecutive_failures {
            Ok(FailureOutcome::Exhausted { consecutive })
        } else {
            Ok(FailureOutcome::Retry { consecutive })
        }
    }

    /// `COMMITTED | FAILED → IDLE`.
    pub fn rearm(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            PollState::Committed | PollState::Failed => {
                self.state = PollState::Idle;
                self.started_at = None;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                to: PollState::Idle,
            }),
        }
    }
}
