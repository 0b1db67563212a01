//! Turning raw electrical levels into stable logical state.
//!
//! Two layers cooperate here. The kernel drops transitions shorter than the
//! debounce period programmed into the line settings, and the device layer
//! never trusts the polarity of the surviving edges: any drained batch just
//! forces a fresh level read, which [`LevelTracker`] folds into the current
//! state.

use std::time::{Duration, Instant};

/// Applies inversion at the read boundary.
pub fn logical_level(raw: bool, invert: bool) -> bool {
    raw ^ invert
}

/// Applies inversion at the write boundary.
pub fn raw_level(logical: bool, invert: bool) -> bool {
    logical ^ invert
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initial(bool),
    Changed(bool),
    Unchanged(bool),
}

impl Transition {
    pub fn level(self) -> bool {
        match self {
            Transition::Initial(level) | Transition::Changed(level) | Transition::Unchanged(level) => {
                level
            }
        }
    }

    pub fn is_change(self) -> bool {
        !matches!(self, Transition::Unchanged(_))
    }
}

/// Last raw level seen on a line, `None` until the first read.
#[derive(Debug, Default, Clone)]
pub struct LevelTracker {
    level: Option<bool>,
}

impl LevelTracker {
    pub fn level(&self) -> Option<bool> {
        self.level
    }

    pub fn observe(&mut self, raw: bool) -> Transition {
        match self.level.replace(raw) {
            None => Transition::Initial(raw),
            Some(prev) if prev != raw => Transition::Changed(raw),
            Some(_) => Transition::Unchanged(raw),
        }
    }

    pub fn invalidate(&mut self) {
        self.level = None;
    }
}

/// Accepts at most one transition per debounce period.
#[derive(Debug, Clone)]
pub struct DebounceWindow {
    period: Duration,
    last: Option<Instant>,
}

impl DebounceWindow {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
        self.last = None;
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        let allow = self
            .last
            .map(|t| now.saturating_duration_since(t) >= self.period)
            .unwrap_or(true);
        if allow {
            self.last = Some(now);
        }
        allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inversion_is_symmetric() {
        for raw in [false, true] {
            for invert in [false, true] {
                assert_eq!(raw_level(logical_level(raw, invert), invert), raw);
            }
        }
        assert!(logical_level(false, true));
        assert!(!logical_level(true, true));
    }

    #[test]
    fn tracker_reports_transitions() {
        let mut tracker = LevelTracker::default();
        assert_eq!(tracker.level(), None);
        assert_eq!(tracker.observe(false), Transition::Initial(false));
        assert_eq!(tracker.observe(false), Transition::Unchanged(false));
        assert_eq!(tracker.observe(true), Transition::Changed(true));
        tracker.invalidate();
        assert_eq!(tracker.observe(true), Transition::Initial(true));
    }

    #[test]
    fn window_drops_chatter() {
        let start = Instant::now();
        let mut window = DebounceWindow::new(Duration::from_millis(50));
        assert!(window.accept(start));
        assert!(!window.accept(start + Duration::from_millis(10)));
        assert!(!window.accept(start + Duration::from_millis(49)));
        assert!(window.accept(start + Duration::from_millis(50)));
    }
}
