//! Guest lifecycle state machine.

use std::fmt;

/// Lifecycle of one guest instance.
///
/// `Unstarted -> Registered -> Running -> Draining -> Stopped`. `Stopped` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unstarted,
    Registered,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Registered => "registered",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Attempted transition not allowed from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} while {state}")]
pub struct InvalidTransition {
    pub state: LifecycleState,
    pub action: &'static str,
}

/// Tracks lifecycle state and enforces legal transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    in_setup: bool,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unstarted,
            in_setup: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True while the setup hook is executing.
    #[must_use]
    pub fn in_setup(&self) -> bool {
        self.in_setup
    }

    /// # Errors
    ///
    /// Only `Unstarted` can move to `Registered`.
    pub fn mark_registered(&mut self) -> Result<(), InvalidTransition> {
        self.transition(LifecycleState::Unstarted, LifecycleState::Registered, "register")
    }

    /// Enter setup. Allowed from `Unstarted` or `Registered`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] once the instance has started.
    pub fn begin_setup(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            LifecycleState::Unstarted | LifecycleState::Registered if !self.in_setup => {
                self.in_setup = true;
                Ok(())
            }
            state => Err(InvalidTransition {
                state,
                action: "set up",
            }),
        }
    }

    /// Leave setup, moving to `Running` on success and `Stopped` otherwise.
    pub fn finish_setup(&mut self, ok: bool) {
        self.in_setup = false;
        self.state = if ok && self.state == LifecycleState::Registered {
            LifecycleState::Running
        } else {
            LifecycleState::Stopped
        };
    }

    /// # Errors
    ///
    /// Records are only accepted while `Running`.
    pub fn ensure_running(&self) -> Result<(), InvalidTransition> {
        if self.state == LifecycleState::Running {
            Ok(())
        } else {
            Err(InvalidTransition {
                state: self.state,
                action: "process a record",
            })
        }
    }

    /// Enter `Draining`. Allowed from `Registered` or `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] from any other state.
    pub fn begin_drain(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            LifecycleState::Registered | LifecycleState::Running => {
                self.state = LifecycleState::Draining;
                Ok(())
            }
            state => Err(InvalidTransition {
                state,
                action: "tear down",
            }),
        }
    }

    pub fn stop(&mut self) {
        self.in_setup = false;
        self.state = LifecycleState::Stopped;
    }

    fn transition(
        &mut self,
        from: LifecycleState,
        to: LifecycleState,
        action: &'static str,
    ) -> Result<(), InvalidTransition> {
        if self.state != from {
            return Err(InvalidTransition {
                state: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut lc = Lifecycle::new();
        lc.mark_registered().unwrap();
        lc.begin_setup().unwrap();
        assert!(lc.in_setup());
        lc.finish_setup(true);
        assert_eq!(lc.state(), LifecycleState::Running);
        lc.ensure_running().unwrap();
        lc.begin_drain().unwrap();
        lc.stop();
        assert_eq!(lc.state(), LifecycleState::Stopped);
    }

    #[test]
    fn setup_without_registration_stops() {
        let mut lc = Lifecycle::new();
        lc.begin_setup().unwrap();
        lc.finish_setup(true);
        assert_eq!(lc.state(), LifecycleState::Stopped);
    }

    #[test]
    fn stopped_is_terminal() {
        let mut lc = Lifecycle::new();
        lc.stop();
        assert!(lc.mark_registered().is_err());
        assert!(lc.begin_setup().is_err());
        assert!(lc.ensure_running().is_err());
        assert!(lc.begin_drain().is_err());
        assert_eq!(lc.state(), LifecycleState::Stopped);
    }

    #[test]
    fn teardown_before_setup_is_allowed() {
        let mut lc = Lifecycle::new();
        lc.mark_registered().unwrap();
        lc.begin_drain().unwrap();
        assert_eq!(lc.state(), LifecycleState::Draining);
    }

    #[test]
    fn second_setup_is_rejected() {
        let mut lc = Lifecycle::new();
        lc.mark_registered().unwrap();
        lc.begin_setup().unwrap();
        lc.finish_setup(true);
        let err = lc.begin_setup().unwrap_err();
        assert_eq!(err.state, LifecycleState::Running);
        assert_eq!(err.to_string(), "cannot set up while running");
    }
}
