//! Timing helpers for the `--time` CLI flag.
//!
//! A small stopwatch built on `Instant` rather than a wall-clock timestamp:
//! nothing here needs to correlate with an absolute time, only measure
//! elapsed durations per file/stage.

use std::time::Instant;

/// A running stopwatch for one render stage.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        Timer { label, start: Instant::now() }
    }

    /// Logs elapsed time at `debug` level and returns it.
    pub fn stop(self) -> std::time::Duration {
        let elapsed = self.start.elapsed();
        log::debug!("{} took {:.3}s", self.label, elapsed.as_secs_f64());
        elapsed
    }
}

/// Runs `f`, logging its duration under `label` when `enabled`.
pub fn timed<T>(label: &'static str, enabled: bool, f: impl FnOnce() -> T) -> T {
    if !enabled {
        return f();
    }
    let timer = Timer::start(label);
    let result = f();
    timer.stop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_runs_the_closure_and_returns_its_value() {
        assert_eq!(timed("noop", true, || 2 + 2), 4);
        assert_eq!(timed("noop", false, || 2 + 2), 4);
    }
}
