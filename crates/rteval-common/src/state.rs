//! Lifecycle state machine shared by every load and measurement module.
//!
//! A module walks the states strictly in order:
//! CREATED → CONFIGURED → BUILT → PREPARED → RUNNING → CLEANING → FINISHED
//!
//! There are no fault or shortcut transitions. A module that fails on the
//! way simply stops advancing and is reported in the state it reached.

use crate::error::{RtevalError, RtevalResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ModuleState {
    /// Instantiated from the registry, nothing validated yet.
    #[default]
    Created = 0,
    /// `setup` validated parameters and resolved resources.
    Configured = 1,
    /// `build` finished its one-time preparation.
    Built = 2,
    /// `prepare` acquired runtime resources.
    Prepared = 3,
    /// Repeated `task` invocations (paused until unleashed).
    Running = 4,
    /// `cleanup` is terminating work units.
    Cleaning = 5,
    /// All work units are gone and handles released.
    Finished = 6,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Configured => write!(f, "CONFIGURED"),
            Self::Built => write!(f, "BUILT"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Cleaning => write!(f, "CLEANING"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

impl ModuleState {
    /// The only state reachable from `self`, if any.
    #[must_use]
    pub fn next(self) -> Option<ModuleState> {
        match self {
            Self::Created => Some(Self::Configured),
            Self::Configured => Some(Self::Built),
            Self::Built => Some(Self::Prepared),
            Self::Prepared => Some(Self::Running),
            Self::Running => Some(Self::Cleaning),
            Self::Cleaning => Some(Self::Finished),
            Self::Finished => None,
        }
    }

    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(self, target: ModuleState) -> bool {
        self.next() == Some(target)
    }

    /// Raw representation, used to publish the state through an atomic.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ModuleState::as_u8`]; out-of-range values map to `None`.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<ModuleState> {
        match raw {
            0 => Some(Self::Created),
            1 => Some(Self::Configured),
            2 => Some(Self::Built),
            3 => Some(Self::Prepared),
            4 => Some(Self::Running),
            5 => Some(Self::Cleaning),
            6 => Some(Self::Finished),
            _ => None,
        }
    }

    /// Returns true once the module has work units that may be alive.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Cleaning)
    }
}

/// Lifecycle tracker with transition history.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    current: ModuleState,
    history: Vec<ModuleState>,
}

impl Lifecycle {
    /// Create a tracker starting in CREATED.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.current
    }

    /// States left behind, oldest first.
    #[must_use]
    pub fn history(&self) -> &[ModuleState] {
        &self.history
    }

    /// Advance to `target`, which must be the immediate successor.
    pub fn advance(&mut self, target: ModuleState) -> RtevalResult<()> {
        if self.current.can_transition_to(target) {
            self.history.push(self.current);
            self.current = target;
            Ok(())
        } else {
            Err(RtevalError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
