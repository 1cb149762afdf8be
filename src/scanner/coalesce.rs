//! Update coalescing
//!
//! Multi-file saves and build tools write in bursts. Each raw update pushes
//! the path's deadline out by the configured delay; a path is reported once
//! its deadline passes with no further update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Per-path deadline tracker
#[derive(Debug)]
pub struct UpdateCoalescer {
    delay: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl UpdateCoalescer {
    /// Create a coalescer with the given quiet period
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadlines: HashMap::new(),
        }
    }

    /// Record a raw update, resetting the path's deadline
    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.deadlines.insert(path, now + self.delay);
    }

    /// Forget a pending update (e.g. the package was removed)
    pub fn cancel(&mut self, path: &Path) {
        self.deadlines.remove(path);
    }

    /// Take every path whose deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let due: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.deadlines.remove(path);
        }
        due
    }

    /// Number of paths waiting to be reported
    #[must_use]
    pub fn pending(&self) -> usize {
        self.deadlines.len()
    }
}
