//! Daily active-time window and the gate that enforces it.
//!
//! Transcoding may be restricted to a window of the day, e.g.
//! `01:00:00-07:00:00`. Workers ask the gate for admission before they start
//! a job and on every encoder progress tick; the gate only answers while the
//! current time is inside the window (or when the window is disabled).
//!
//! The gate runs one background loop. It publishes its state through a
//! `watch` channel and restarts its evaluation whenever the window changes.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{Local, NaiveTime, TimeDelta, Timelike};
use regex::Regex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Result};

static WINDOW_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+):(\d+):(\d+)-(\d+):(\d+):(\d+)\s*$").unwrap()
});

/// Pending admission requests the gate buffers before senders wait.
const ADMISSION_QUEUE: usize = 64;

/// A daily `begin-end` window. Equal ends mean the gate is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveTimeWindow {
    begin: NaiveTime,
    end: NaiveTime,
}

impl ActiveTimeWindow {
    pub fn new(begin: NaiveTime, end: NaiveTime) -> Self {
        Self { begin, end }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> NaiveTime {
        self.begin
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn is_disabled(&self) -> bool {
        self.begin == self.end
    }

    /// Whether `now` falls inside the window. A window whose end is before its
    /// begin crosses midnight.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.is_disabled() {
            return true;
        }
        if self.begin < self.end {
            self.begin <= now && now < self.end
        } else {
            now >= self.begin || now < self.end
        }
    }

    /// Time until the next begin, rolling over to tomorrow once it has passed.
    pub fn time_to_begin(&self, now: NaiveTime) -> Duration {
        until(self.begin, now)
    }

    /// Time until the next end, rolling over to tomorrow once it has passed.
    pub fn time_to_end(&self, now: NaiveTime) -> Duration {
        until(self.end, now)
    }

    pub fn evaluate(&self, now: NaiveTime) -> GateState {
        if self.is_disabled() {
            GateState::Disabled
        } else if self.contains(now) {
            GateState::InsideWindow {
                until_end: self.time_to_end(now),
            }
        } else {
            GateState::OutsideWindow {
                until_begin: self.time_to_begin(now),
            }
        }
    }
}

fn until(target: NaiveTime, now: NaiveTime) -> Duration {
    let mut delta = target.signed_duration_since(now);
    if delta < TimeDelta::zero() {
        delta += TimeDelta::days(1);
    }
    delta.to_std().unwrap_or_default()
}

impl FromStr for ActiveTimeWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidActiveTime(s.to_string());
        let caps = WINDOW_REGEX.captures(s).ok_or_else(invalid)?;

        let mut fields = [0u32; 6];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = caps[i + 1].parse().map_err(|_| invalid())?;
        }
        let begin = NaiveTime::from_hms_opt(fields[0], fields[1], fields[2]).ok_or_else(invalid)?;
        let end = NaiveTime::from_hms_opt(fields[3], fields[4], fields[5]).ok_or_else(invalid)?;
        Ok(Self { begin, end })
    }
}

impl fmt::Display for ActiveTimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}-{:02}:{:02}:{:02}",
            self.begin.hour(),
            self.begin.minute(),
            self.begin.second(),
            self.end.hour(),
            self.end.minute(),
            self.end.second()
        )
    }
}

/// What the gate is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    Disabled,
    OutsideWindow { until_begin: Duration },
    InsideWindow { until_end: Duration },
}

impl GateState {
    pub fn admits(&self) -> bool {
        !matches!(self, Self::OutsideWindow { .. })
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::OutsideWindow { until_begin } => {
                write!(f, "paused, opens in {}s", until_begin.as_secs())
            }
            Self::InsideWindow { until_end } => {
                write!(f, "active, closes in {}s", until_end.as_secs())
            }
        }
    }
}

/// Source of the current time of day.
pub type Clock = Arc<dyn Fn() -> NaiveTime + Send + Sync>;

fn local_clock() -> Clock {
    Arc::new(|| Local::now().time())
}

/// Admission gate driven by an [`ActiveTimeWindow`].
#[derive(Debug, Clone)]
pub struct ActiveTimeGate {
    window_tx: Arc<watch::Sender<ActiveTimeWindow>>,
    state_rx: watch::Receiver<GateState>,
    admit_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl ActiveTimeGate {
    /// Spawn the gate loop using the local wall clock.
    pub fn spawn(window: ActiveTimeWindow, token: CancellationToken) -> Self {
        Self::spawn_with_clock(window, local_clock(), token)
    }

    pub fn spawn_with_clock(
        window: ActiveTimeWindow,
        clock: Clock,
        token: CancellationToken,
    ) -> Self {
        let (window_tx, window_rx) = watch::channel(window);
        let (state_tx, state_rx) = watch::channel(window.evaluate(clock()));
        let (admit_tx, admit_rx) = mpsc::channel(ADMISSION_QUEUE);

        tokio::spawn(run_gate(window_rx, state_tx, admit_rx, clock, token));

        Self {
            window_tx: Arc::new(window_tx),
            state_rx,
            admit_tx,
        }
    }

    pub fn window(&self) -> ActiveTimeWindow {
        *self.window_tx.borrow()
    }

    pub fn state(&self) -> GateState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state_rx.clone()
    }

    /// Replace the window. The string is validated first; an invalid window
    /// leaves the gate untouched.
    pub fn set_window(&self, window: &str) -> Result<ActiveTimeWindow> {
        let window: ActiveTimeWindow = window.parse()?;
        self.window_tx.send_replace(window);
        info!(window = %window, "Active time window updated");
        Ok(window)
    }

    /// Wait until the gate lets work proceed.
    pub async fn wait_admission(&self, token: &CancellationToken) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let stopped = || Error::Other("active time gate stopped".to_string());

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            sent = self.admit_tx.send(reply_tx) => sent.map_err(|_| stopped())?,
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            reply = reply_rx => reply.map_err(|_| stopped()),
        }
    }
}

async fn run_gate(
    mut window_rx: watch::Receiver<ActiveTimeWindow>,
    state_tx: watch::Sender<GateState>,
    mut admit_rx: mpsc::Receiver<oneshot::Sender<()>>,
    clock: Clock,
    token: CancellationToken,
) {
    'restart: loop {
        let window = *window_rx.borrow_and_update();
        debug!(window = %window, "Evaluating active time window");

        loop {
            let state = window.evaluate(clock());
            state_tx.send_replace(state);
            debug!(state = %state, "Active time gate state");

            let (armed, wait) = match state {
                GateState::Disabled => (false, Duration::MAX),
                GateState::OutsideWindow { until_begin } => (true, until_begin),
                GateState::InsideWindow { until_end } => (true, until_end),
            };
            let timer = tokio::time::sleep(wait);
            tokio::pin!(timer);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("Active time gate stopped");
                        return;
                    }
                    changed = window_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue 'restart;
                    }
                    _ = &mut timer, if armed => break,
                    Some(reply) = admit_rx.recv(), if state.admits() => {
                        let _ = reply.send(());
                    }
                }
            }
        }
    }
}
