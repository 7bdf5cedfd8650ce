//! Sync engine lifecycle state machine.
//!
//! `Stopped -> Starting -> Running <-> Paused -> Stopped`. Starting waits for
//! an active pairing (pairing id plus shared secret) and gives up after a
//! bounded number of attempts. The engine in clip-client executes the
//! returned actions.

/// Engine state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not syncing.
    Stopped,
    /// Waiting for pairing credentials.
    Starting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Attempts allowed before giving up.
        max_attempts: u32,
    },
    /// Both loops running.
    Running,
    /// Loops stopped, bookkeeping kept.
    Paused,
}

impl EngineState {
    /// Create a new state machine in the Stopped state.
    pub fn new() -> Self {
        Self::Stopped
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: EngineEvent) -> (Self, Vec<EngineAction>) {
        match (self, event) {
            // From Stopped
            (Self::Stopped, EngineEvent::StartRequested { max_attempts }) => (
                Self::Starting {
                    attempt: 1,
                    max_attempts: max_attempts.max(1),
                },
                vec![EngineAction::CheckPairing],
            ),

            // From Starting
            (Self::Starting { .. }, EngineEvent::PairingReady) => (
                Self::Running,
                vec![
                    EngineAction::StartListener,
                    EngineAction::StartWatchdog,
                    EngineAction::Notify(EngineNotice::Started),
                ],
            ),
            (
                Self::Starting {
                    attempt,
                    max_attempts,
                },
                EngineEvent::PairingMissing,
            ) => {
                if attempt >= max_attempts {
                    (
                        Self::Stopped,
                        vec![EngineAction::Notify(EngineNotice::StartAbandoned {
                            attempts: attempt,
                        })],
                    )
                } else {
                    let next = attempt.saturating_add(1);
                    (
                        Self::Starting {
                            attempt: next,
                            max_attempts,
                        },
                        vec![EngineAction::ScheduleRetry { attempt: next }],
                    )
                }
            }
            (state @ Self::Starting { .. }, EngineEvent::RetryTimer) => {
                (state, vec![EngineAction::CheckPairing])
            }
            (Self::Starting { .. }, EngineEvent::StopRequested) => (
                Self::Stopped,
                vec![EngineAction::Notify(EngineNotice::Stopped)],
            ),

            // From Running
            (Self::Running, EngineEvent::PauseRequested) => (
                Self::Paused,
                vec![
                    EngineAction::StopWatchdog,
                    EngineAction::StopListener,
                    EngineAction::Notify(EngineNotice::Paused),
                ],
            ),
            (Self::Running, EngineEvent::ListenerStale) => (
                Self::Running,
                vec![
                    EngineAction::RestartListener,
                    EngineAction::Notify(EngineNotice::ListenerRestarted),
                ],
            ),
            (Self::Running, EngineEvent::RefreshRequested) => {
                (Self::Running, vec![EngineAction::RestartListener])
            }

            // From Paused
            (Self::Paused, EngineEvent::ResumeRequested) => (
                Self::Running,
                vec![
                    EngineAction::StartListener,
                    EngineAction::StartWatchdog,
                    EngineAction::Notify(EngineNotice::Resumed),
                ],
            ),

            // Stop from an active state
            (Self::Running | Self::Paused, EngineEvent::StopRequested) => (
                Self::Stopped,
                vec![
                    EngineAction::StopWatchdog,
                    EngineAction::StopListener,
                    EngineAction::Notify(EngineNotice::Stopped),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if both loops should be running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs to the engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Start syncing.
    StartRequested {
        /// Attempts allowed while waiting for credentials.
        max_attempts: u32,
    },
    /// Pairing id and secret are available.
    PairingReady,
    /// Pairing id or secret is missing.
    PairingMissing,
    /// Retry delay elapsed.
    RetryTimer,
    /// Pause syncing.
    PauseRequested,
    /// Resume syncing.
    ResumeRequested,
    /// Stop syncing.
    StopRequested,
    /// Watchdog found the listener silent for too long.
    ListenerStale,
    /// User asked for an immediate re-read.
    RefreshRequested,
}

/// Side effects requested by the engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    /// Look up the active pairing.
    CheckPairing,
    /// Wait the retry delay, then feed `RetryTimer`.
    ScheduleRetry {
        /// Attempt that will run after the delay.
        attempt: u32,
    },
    /// Spawn the inbound listener.
    StartListener,
    /// Cancel the inbound listener.
    StopListener,
    /// Cancel and respawn the inbound listener.
    RestartListener,
    /// Spawn the watchdog.
    StartWatchdog,
    /// Cancel the watchdog.
    StopWatchdog,
    /// Tell the application.
    Notify(EngineNotice),
}

/// Lifecycle events surfaced to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineNotice {
    /// Engine is running.
    Started,
    /// Engine stopped.
    Stopped,
    /// Engine paused.
    Paused,
    /// Engine resumed.
    Resumed,
    /// No pairing appeared in time.
    StartAbandoned {
        /// Attempts made.
        attempts: u32,
    },
    /// Watchdog restarted the listener.
    ListenerRestarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starting(attempt: u32) -> EngineState {
        EngineState::Starting {
            attempt,
            max_attempts: 5,
        }
    }

    #[test]
    fn initial_state_is_stopped() {
        assert_eq!(EngineState::new(), EngineState::Stopped);
    }

    // ===========================================
    // Start
    // ===========================================

    #[test]
    fn start_checks_pairing() {
        let (state, actions) =
            EngineState::new().on_event(EngineEvent::StartRequested { max_attempts: 5 });
        assert_eq!(state, starting(1));
        assert_eq!(actions, vec![EngineAction::CheckPairing]);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let (state, _) =
            EngineState::new().on_event(EngineEvent::StartRequested { max_attempts: 0 });
        assert_eq!(
            state,
            EngineState::Starting {
                attempt: 1,
                max_attempts: 1
            }
        );
    }

    #[test]
    fn ready_pairing_starts_both_loops() {
        let (state, actions) = starting(1).on_event(EngineEvent::PairingReady);
        assert!(state.is_running());
        assert!(actions.contains(&EngineAction::StartListener));
        assert!(actions.contains(&EngineAction::StartWatchdog));
        assert!(actions.contains(&EngineAction::Notify(EngineNotice::Started)));
    }

    #[test]
    fn missing_pairing_schedules_retry() {
        let (state, actions) = starting(1).on_event(EngineEvent::PairingMissing);
        assert_eq!(state, starting(2));
        assert_eq!(actions, vec![EngineAction::ScheduleRetry { attempt: 2 }]);

        let (state, actions) = state.on_event(EngineEvent::RetryTimer);
        assert_eq!(state, starting(2));
        assert_eq!(actions, vec![EngineAction::CheckPairing]);
    }

    #[test]
    fn start_gives_up_after_max_attempts() {
        let mut state = EngineState::new()
            .on_event(EngineEvent::StartRequested { max_attempts: 5 })
            .0;
        for _ in 0..4 {
            state = state.on_event(EngineEvent::PairingMissing).0;
            state = state.on_event(EngineEvent::RetryTimer).0;
        }
        assert_eq!(state, starting(5));
        let (state, actions) = state.on_event(EngineEvent::PairingMissing);
        assert_eq!(state, EngineState::Stopped);
        assert_eq!(
            actions,
            vec![EngineAction::Notify(EngineNotice::StartAbandoned { attempts: 5 })]
        );
    }

    #[test]
    fn stop_while_starting() {
        let (state, _) = starting(3).on_event(EngineEvent::StopRequested);
        assert_eq!(state, EngineState::Stopped);
    }

    // ===========================================
    // Running / Paused
    // ===========================================

    #[test]
    fn pause_and_resume() {
        let (state, actions) = EngineState::Running.on_event(EngineEvent::PauseRequested);
        assert!(state.is_paused());
        assert!(actions.contains(&EngineAction::StopListener));
        assert!(actions.contains(&EngineAction::StopWatchdog));

        let (state, actions) = state.on_event(EngineEvent::ResumeRequested);
        assert!(state.is_running());
        assert!(actions.contains(&EngineAction::StartListener));
        assert!(actions.contains(&EngineAction::StartWatchdog));
    }

    #[test]
    fn stale_listener_is_restarted() {
        let (state, actions) = EngineState::Running.on_event(EngineEvent::ListenerStale);
        assert!(state.is_running());
        assert_eq!(actions[0], EngineAction::RestartListener);
    }

    #[test]
    fn stale_listener_while_paused_is_ignored() {
        let (state, actions) = EngineState::Paused.on_event(EngineEvent::ListenerStale);
        assert!(state.is_paused());
        assert!(actions.is_empty());
    }

    #[test]
    fn refresh_only_when_running() {
        let (_, actions) = EngineState::Running.on_event(EngineEvent::RefreshRequested);
        assert_eq!(actions, vec![EngineAction::RestartListener]);
        let (_, actions) = EngineState::Stopped.on_event(EngineEvent::RefreshRequested);
        assert!(actions.is_empty());
    }

    #[test]
    fn stop_from_paused() {
        let (state, actions) = EngineState::Paused.on_event(EngineEvent::StopRequested);
        assert_eq!(state, EngineState::Stopped);
        assert!(actions.contains(&EngineAction::Notify(EngineNotice::Stopped)));
    }

    #[test]
    fn start_while_running_is_noop() {
        let (state, actions) =
            EngineState::Running.on_event(EngineEvent::StartRequested { max_attempts: 5 });
        assert!(state.is_running());
        assert!(actions.is_empty());
    }
}
