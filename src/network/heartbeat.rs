//! Heartbeat Monitor
//!
//! Periodic liveness probes plus an independent timeout sweep.
//!
//! Each tracked participant carries a `last_seen` instant. The sweep marks a
//! participant timed out once `now − last_seen ≥ timeout`, stops probing it
//! and fires the timeout callback exactly once. A later response clears the
//! mark, which makes the participant eligible for a further timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{CancelToken, ParticipantId};
use crate::error::TypedError;

// =============================================================================
// CONFIG
// =============================================================================

/// Heartbeat timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Probe interval.
    pub interval: Duration,
    /// Timeout sweep interval.
    pub sweep_interval: Duration,
    /// Silence after which a participant is considered gone.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Short intervals for tests and local play.
    pub fn test_profile() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            sweep_interval: Duration::from_millis(500),
            timeout: Duration::from_millis(3000),
        }
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Delivers a liveness probe to a participant.
pub trait ProbeSink: Send + Sync {
    /// Send probe number `sequence`.
    fn send_probe(&self, participant: &ParticipantId, sequence: u64) -> Result<(), TypedError>;
}

/// Called once per timeout violation with the observed silence.
pub type TimeoutCallback = Arc<dyn Fn(ParticipantId, Duration) + Send + Sync>;

// =============================================================================
// MONITOR
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: Instant,
    timed_out: bool,
}

/// Liveness tracking for every connected participant.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    liveness: DashMap<ParticipantId, Liveness>,
    sink: Arc<dyn ProbeSink>,
    on_timeout: RwLock<Option<TimeoutCallback>>,
    probe_sequence: AtomicU64,
    probes_sent: AtomicU64,
    probe_failures: AtomicU64,
    timeouts: AtomicU64,
    cancel: CancelToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    pub fn new(config: HeartbeatConfig, sink: Arc<dyn ProbeSink>) -> Self {
        Self {
            config,
            liveness: DashMap::new(),
            sink,
            on_timeout: RwLock::new(None),
            probe_sequence: AtomicU64::new(0),
            probes_sent: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            cancel: CancelToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Install the timeout callback, replacing any previous one.
    pub fn set_timeout_callback(&self, callback: TimeoutCallback) {
        *self.on_timeout.write() = Some(callback);
    }

    /// Timing in use.
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Start tracking a participant from now.
    pub fn track(&self, participant: ParticipantId) {
        self.liveness.insert(
            participant,
            Liveness {
                last_seen: Instant::now(),
                timed_out: false,
            },
        );
    }

    /// Stop tracking a participant.
    pub fn untrack(&self, participant: &ParticipantId) -> bool {
        self.liveness.remove(participant).is_some()
    }

    /// Is the participant tracked?
    pub fn is_tracked(&self, participant: &ParticipantId) -> bool {
        self.liveness.contains_key(participant)
    }

    /// Record a probe response. Resets the clock and timeout eligibility.
    pub fn record_response(&self, participant: &ParticipantId) -> bool {
        match self.liveness.get_mut(participant) {
            Some(mut entry) => {
                if entry.timed_out {
                    debug!(participant = %participant, "Heartbeat resumed after timeout");
                }
                entry.last_seen = Instant::now();
                entry.timed_out = false;
                true
            }
            None => false,
        }
    }

    /// Time since the participant was last heard from.
    pub fn silence(&self, participant: &ParticipantId) -> Option<Duration> {
        self.liveness
            .get(participant)
            .map(|e| Instant::now().saturating_duration_since(e.last_seen))
    }

    /// Send one probe to every responsive participant. Returns probes sent.
    pub fn probe_all(&self) -> usize {
        let targets: Vec<ParticipantId> = self
            .liveness
            .iter()
            .filter(|e| !e.timed_out)
            .map(|e| *e.key())
            .collect();

        let mut sent = 0;
        for participant in targets {
            let sequence = self.probe_sequence.fetch_add(1, Ordering::Relaxed) + 1;
            match self.sink.send_probe(&participant, sequence) {
                Ok(()) => sent += 1,
                Err(e) => {
                    self.probe_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(participant = %participant, code = e.code(), error = %e, "Heartbeat probe failed");
                }
            }
        }
        self.probes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        sent
    }

    /// Mark newly silent participants and fire the callback once for each.
    pub fn sweep(&self) -> Vec<ParticipantId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        for mut entry in self.liveness.iter_mut() {
            if entry.timed_out {
                continue;
            }
            let silence = now.saturating_duration_since(entry.last_seen);
            if silence >= self.config.timeout {
                entry.timed_out = true;
                expired.push((*entry.key(), silence));
            }
        }

        if expired.is_empty() {
            return Vec::new();
        }

        self.timeouts.fetch_add(expired.len() as u64, Ordering::Relaxed);
        let callback = self.on_timeout.read().clone();
        for (participant, silence) in &expired {
            warn!(participant = %participant, silence_ms = silence.as_millis() as u64, "Heartbeat timeout");
            if let Some(callback) = &callback {
                callback(*participant, *silence);
            }
        }
        expired.into_iter().map(|(p, _)| p).collect()
    }

    /// Spawn the probe and sweep loops. Loops hold only a weak reference.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        tasks.push(spawn_loop(
            Arc::downgrade(self),
            self.cancel.clone(),
            self.config.interval,
            |monitor| {
                monitor.probe_all();
            },
        ));
        tasks.push(spawn_loop(
            Arc::downgrade(self),
            self.cancel.clone(),
            self.config.sweep_interval,
            |monitor| {
                monitor.sweep();
            },
        ));

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Heartbeat monitor started"
        );
    }

    /// Is the monitor running?
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tasks.lock().is_empty()
    }

    /// Cancel both loops and wait for them to exit. Clears all tracking.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.liveness.clear();
        info!("Heartbeat monitor stopped");
    }

    /// Total timeouts fired.
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Total probes delivered.
    pub fn probes_sent(&self) -> u64 {
        self.probes_sent.load(Ordering::Relaxed)
    }

    /// Total probes the sink refused.
    pub fn probe_failures(&self) -> u64 {
        self.probe_failures.load(Ordering::Relaxed)
    }

    /// Number of tracked participants.
    pub fn tracked(&self) -> usize {
        self.liveness.len()
    }
}

impl fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("config", &self.config)
            .field("tracked", &self.liveness.len())
            .field("timeouts", &self.timeout_count())
            .finish()
    }
}

fn spawn_loop<F>(
    monitor: Weak<HeartbeatMonitor>,
    cancel: CancelToken,
    period: Duration,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut(&HeartbeatMonitor) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(monitor) = monitor.upgrade() else { break };
                    step(&monitor);
                }
            }
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================
