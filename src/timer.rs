use std::time::Instant;

/// Monotonic stopwatch started when a unit of work begins.
///
/// Stored in the shared context under `startProcessingTimer`; the formatter
/// reads it when a record asks for the global duration.
#[derive(Debug, Clone, Copy)]
pub struct ElapsedTimer {
    start: Instant,
}

impl ElapsedTimer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Timer that started at `start` rather than now.
    pub fn from_start(start: Instant) -> Self {
        Self { start }
    }

    /// Whole milliseconds elapsed since construction.
    pub fn duration(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn started_at(&self) -> Instant {
        self.start
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new()
    }
}
