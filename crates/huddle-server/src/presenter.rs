//! Screen-share presenter lock.
//!
//! A single cell that is either idle or holds exactly one presenter name.
//! Owned by the room actor; the room sends the notices that go with each
//! transition.

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Idle → Presenting(name).
    Started,
    /// The lock is held, even by the requester; nothing changed.
    Busy,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Presenting(name) → Idle.
    Stopped,
    /// The requester does not hold the lock; nothing changed.
    NotPresenter,
}

#[derive(Debug, Default)]
pub struct PresenterLock {
    current: Option<String>,
}

impl PresenterLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_start(&mut self, name: &str) -> StartOutcome {
        if self.current.is_some() {
            return StartOutcome::Busy;
        }
        self.current = Some(name.to_string());
        StartOutcome::Started
    }

    pub fn stop(&mut self, name: &str) -> StopOutcome {
        if self.release_if(name) {
            StopOutcome::Stopped
        } else {
            StopOutcome::NotPresenter
        }
    }

    /// Force Idle if `name` is the presenter. Returns whether it was.
    pub fn release_if(&mut self, name: &str) -> bool {
        if self.current.as_deref() == Some(name) {
            self.current = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
