//! Cooperative run-state machine shared between a test worker and whoever
//! drives it.
//!
//! The worker never gets killed: it polls [`RunController::should_stop`] in
//! every inner loop. That call parks the worker while the state is `Pause`
//! and stops the attached [`PrecisionClock`] for the duration, so paused
//! time never shows up in throughput figures.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::PrecisionClock;

pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    None,
    Run,
    Pause,
    Stop,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (None, Run) | (None, Pause) | (None, Stop)
                | (Run, Pause) | (Run, Stop)
                | (Pause, Run) | (Pause, Stop)
                | (Stop, None)
        )
    }
}

pub struct RunController {
    state: Mutex<RunState>,
    changed: Condvar,
    poll: Duration,
}

impl Default for RunController {
    fn default() -> Self {
        RunController::new(DEFAULT_PAUSE_POLL)
    }
}

impl RunController {
    pub fn new(poll: Duration) -> Self {
        RunController {
            state: Mutex::new(RunState::None),
            changed: Condvar::new(),
            poll,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Attempt a transition. Illegal transitions are ignored; the return
    /// value says whether the state actually changed.
    pub fn request(&self, next: RunState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return false;
        }
        *state = next;
        self.changed.notify_all();
        true
    }

    /// True once the worker should wind down (`Stop` or `None`).
    /// Blocks for as long as the state is `Pause`.
    pub fn should_stop(&self) -> bool {
        self.wait_while_paused(None)
    }

    /// Like [`should_stop`](Self::should_stop), but also freezes `clock`
    /// while paused.
    pub fn should_stop_timed(&self, clock: &mut PrecisionClock) -> bool {
        self.wait_while_paused(Some(clock))
    }

    fn wait_while_paused(&self, mut clock: Option<&mut PrecisionClock>) -> bool {
        let mut state = self.state.lock();
        if *state == RunState::Pause {
            if let Some(c) = clock.as_deref_mut() {
                c.stop();
            }
            while *state == RunState::Pause {
                // Bounded wait; every transition also notifies.
                let _ = self.changed.wait_for(&mut state, self.poll);
            }
            if let Some(c) = clock.as_deref_mut() {
                c.start();
            }
        }
        matches!(*state, RunState::Stop | RunState::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn transition_table() {
        use RunState::*;
        let all = [None, Run, Pause, Stop];
        let legal = [
            (None, Run),
            (None, Pause),
            (None, Stop),
            (Run, Pause),
            (Run, Stop),
            (Pause, Run),
            (Pause, Stop),
            (Stop, None),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn illegal_requests_are_noops() {
        let rc = RunController::default();
        assert!(!rc.request(RunState::None));
        assert!(rc.request(RunState::Run));
        assert!(!rc.request(RunState::None));
        assert_eq!(rc.state(), RunState::Run);
        assert!(rc.request(RunState::Stop));
        assert!(!rc.request(RunState::Run));
        assert!(rc.request(RunState::None));
    }

    #[test]
    fn should_stop_reflects_state() {
        let rc = RunController::default();
        assert!(rc.should_stop());
        rc.request(RunState::Run);
        assert!(!rc.should_stop());
        rc.request(RunState::Stop);
        assert!(rc.should_stop());
    }

    #[test]
    fn pause_blocks_until_resume_and_excludes_time() {
        let rc = Arc::new(RunController::new(Duration::from_secs(5)));
        rc.request(RunState::Run);
        rc.request(RunState::Pause);

        let waker = Arc::clone(&rc);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            waker.request(RunState::Run);
        });

        let mut clock = PrecisionClock::started();
        let start_ticks = clock.ticks();
        let wall = Instant::now();
        assert!(!rc.should_stop_timed(&mut clock));
        let waited = wall.elapsed();
        t.join().unwrap();

        // Woken by the notify, not by the 5 s poll.
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_secs(4));
        assert!(clock.seconds_since(start_ticks) < 0.1);
        assert!(clock.is_running());
    }

    #[test]
    fn stop_while_paused_wakes_and_reports_stop() {
        let rc = Arc::new(RunController::default());
        rc.request(RunState::Pause);
        let waker = Arc::clone(&rc);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.request(RunState::Stop);
        });
        assert!(rc.should_stop());
        t.join().unwrap();
    }
}
