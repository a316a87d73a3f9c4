//! Traffic signal state machine and its phase cycle task
//!
//! The cycle runs as one tokio task per signal. It sleeps in poll-sized
//! increments and re-checks `cycling && !emergency_mode` under the state lock
//! before each increment and before every phase change, so power-off and
//! emergency take effect within one poll interval. `cycle_task_running` lives
//! under the same lock, which keeps a second `PowerOn` from spawning a
//! duplicate task.

use crate::domain::command::{Command, CommandReply};
use crate::domain::types::{SignalPhase, SignalTimings};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalState {
    pub system_active: bool,
    pub cycling: bool,
    pub phase: SignalPhase,
    pub timings: SignalTimings,
    pub pending_timings: Option<SignalTimings>,
    pub emergency_mode: bool,
    pub cycle_task_running: bool,
    /// Number of cycle tasks ever spawned
    #[serde(skip)]
    pub cycle_starts: u64,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            system_active: true,
            cycling: false,
            phase: SignalPhase::Red,
            timings: SignalTimings::default(),
            pending_timings: None,
            emergency_mode: false,
            cycle_task_running: false,
            cycle_starts: 0,
        }
    }
}

impl SignalState {
    fn should_cycle(&self) -> bool {
        self.cycling && !self.emergency_mode
    }
}

fn next_phase(phase: SignalPhase) -> SignalPhase {
    match phase {
        SignalPhase::Red => SignalPhase::Green,
        SignalPhase::Green => SignalPhase::Yellow,
        SignalPhase::Yellow => SignalPhase::Red,
    }
}

#[derive(Debug, Clone)]
pub struct TrafficSignal {
    state: Arc<Mutex<SignalState>>,
    poll: Duration,
}

impl Default for TrafficSignal {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl TrafficSignal {
    pub fn new(poll: Duration) -> Self {
        Self { state: Arc::new(Mutex::new(SignalState::default())), poll }
    }

    pub fn state(&self) -> SignalState {
        self.state.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().system_active
    }

    pub fn reactivate(&self) {
        self.state.lock().system_active = true;
    }

    /// Apply a command; must be called from within a tokio runtime
    pub fn apply(&self, command: &Command) -> CommandReply {
        let mut state = self.state.lock();

        match command {
            Command::PowerOn => {
                if !state.system_active {
                    return CommandReply::rejected("signal system is inactive");
                }
                if state.emergency_mode {
                    state.emergency_mode = false;
                    state.phase = SignalPhase::Red;
                }
                state.cycling = true;
                if !state.cycle_task_running {
                    state.cycle_task_running = true;
                    state.cycle_starts += 1;
                    tokio::spawn(run_cycle(self.state.clone(), self.poll));
                }
                CommandReply::applied("signal cycling")
            }
            Command::PowerOff => {
                if !state.system_active {
                    return CommandReply::rejected("signal system is inactive");
                }
                state.cycling = false;
                state.emergency_mode = false;
                CommandReply::applied("signal stopped")
            }
            Command::SetTimings(timings) => {
                if state.cycling {
                    state.pending_timings = Some(*timings);
                    CommandReply::applied("timings take effect at the next cycle")
                } else {
                    state.timings = *timings;
                    state.pending_timings = None;
                    CommandReply::applied("timings updated")
                }
            }
            Command::TriggerEmergency => {
                if !state.system_active {
                    return CommandReply::rejected("signal system is inactive");
                }
                state.phase = SignalPhase::Yellow;
                state.emergency_mode = true;
                state.cycling = false;
                CommandReply::applied("emergency mode: flashing yellow")
            }
            Command::Deactivate => {
                if !state.system_active {
                    return CommandReply::rejected("signal system is inactive");
                }
                state.system_active = false;
                state.cycling = false;
                CommandReply::applied("signal deactivated")
            }
            other => CommandReply::rejected(format!("{} is not a signal command", other.name())),
        }
    }
}

/// Check the cycle flags; clears `cycle_task_running` when the task must stop
fn keep_running(state: &Mutex<SignalState>) -> bool {
    let mut s = state.lock();
    if s.should_cycle() {
        true
    } else {
        s.cycle_task_running = false;
        false
    }
}

async fn run_cycle(state: Arc<Mutex<SignalState>>, poll: Duration) {
    debug!("signal_cycle_started");
    loop {
        let phase_duration = {
            let mut s = state.lock();
            if !s.should_cycle() {
                s.cycle_task_running = false;
                break;
            }
            if s.phase == SignalPhase::Red {
                if let Some(pending) = s.pending_timings.take() {
                    s.timings = pending;
                }
            }
            s.timings.duration_of(s.phase)
        };

        let Some(phase_end) = Instant::now().checked_add(phase_duration) else {
            let mut s = state.lock();
            warn!(secs = phase_duration.as_secs(), "signal_phase_duration_overflow");
            s.cycling = false;
            s.cycle_task_running = false;
            break;
        };
        let mut stopped = false;
        while Instant::now() < phase_end {
            let remaining = phase_end.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(poll)).await;
            if !keep_running(&state) {
                stopped = true;
                break;
            }
        }
        if stopped {
            break;
        }

        let mut s = state.lock();
        if !s.should_cycle() {
            s.cycle_task_running = false;
            break;
        }
        s.phase = next_phase(s.phase);
        debug!(phase = %s.phase, "signal_phase_changed");
    }
    debug!("signal_cycle_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_signal() -> TrafficSignal {
        TrafficSignal::new(Duration::from_millis(10))
    }

    #[test]
    fn test_initial_state() {
        let signal = TrafficSignal::default();
        let state = signal.state();
        assert!(state.system_active);
        assert!(!state.cycling);
        assert_eq!(state.phase, SignalPhase::Red);
        assert_eq!(state.timings, SignalTimings { red: 30, green: 25, yellow: 5 });
    }

    #[tokio::test]
    async fn test_emergency_from_any_phase_is_immediate() {
        for start in [SignalPhase::Red, SignalPhase::Green, SignalPhase::Yellow] {
            let signal = fast_signal();
            signal.apply(&Command::PowerOn);
            signal.state.lock().phase = start;

            assert!(signal.apply(&Command::TriggerEmergency).is_applied());
            let state = signal.state();
            assert_eq!(state.phase, SignalPhase::Yellow);
            assert!(state.emergency_mode);
            assert!(!state.cycling);
        }
    }

    #[tokio::test]
    async fn test_cycle_task_stops_within_poll_increment() {
        let signal = fast_signal();
        signal.apply(&Command::PowerOn);
        assert!(signal.state().cycle_task_running);

        signal.apply(&Command::TriggerEmergency);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!signal.state().cycle_task_running);

        signal.apply(&Command::PowerOn);
        signal.apply(&Command::PowerOff);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!signal.state().cycle_task_running);
    }

    #[tokio::test]
    async fn test_duplicate_power_on_spawns_one_task() {
        let signal = fast_signal();
        signal.apply(&Command::PowerOn);
        signal.apply(&Command::PowerOn);
        signal.apply(&Command::PowerOn);
        assert_eq!(signal.state().cycle_starts, 1);
    }

    #[tokio::test]
    async fn test_phase_advances_and_pending_timings_apply_next_cycle() {
        let signal = fast_signal();
        signal.apply(&Command::SetTimings(SignalTimings { red: 1, green: 1, yellow: 1 }));
        assert_eq!(signal.state().timings.red, 1);

        signal.apply(&Command::PowerOn);
        // let the task enter its first red phase
        tokio::time::sleep(Duration::from_millis(30)).await;

        signal.apply(&Command::SetTimings(SignalTimings { red: 2, green: 2, yellow: 2 }));
        let state = signal.state();
        assert_eq!(state.timings.red, 1);
        assert_eq!(state.pending_timings.map(|t| t.red), Some(2));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let state = signal.state();
        assert_eq!(state.phase, SignalPhase::Green);
        assert_eq!(state.timings.red, 1);
        assert!(state.pending_timings.is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_phase_stops_cycle_cleanly() {
        let signal = fast_signal();
        signal.apply(&Command::SetTimings(SignalTimings { red: u64::MAX, green: 1, yellow: 1 }));
        signal.apply(&Command::PowerOn);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = signal.state();
        assert!(!state.cycle_task_running);
        assert!(!state.cycling);

        // Valid timings let the next PowerOn start a fresh task
        signal.apply(&Command::SetTimings(SignalTimings { red: 1, green: 1, yellow: 1 }));
        signal.apply(&Command::PowerOn);
        let state = signal.state();
        assert!(state.cycle_task_running);
        assert_eq!(state.cycle_starts, 2);
        signal.apply(&Command::PowerOff);
    }

    #[tokio::test]
    async fn test_inactive_signal_rejects_commands() {
        let signal = fast_signal();
        signal.apply(&Command::PowerOn);
        assert!(signal.apply(&Command::Deactivate).is_applied());
        assert!(!signal.is_active());
        assert!(!signal.state().cycling);

        assert!(!signal.apply(&Command::PowerOn).is_applied());
        assert!(!signal.apply(&Command::PowerOff).is_applied());
        assert!(!signal.apply(&Command::TriggerEmergency).is_applied());

        signal.reactivate();
        assert!(signal.apply(&Command::PowerOn).is_applied());
    }
}
