use std::time::Duration;

const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Converts elapsed wall time into whole simulation frames.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: Duration,
    accumulator: Duration,
    max_catch_up: u32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32, max_catch_up: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: Duration::from_nanos(1_000_000_000 / u64::from(tick_rate)),
            accumulator: Duration::ZERO,
            max_catch_up: max_catch_up.max(1),
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_FRAME_DELTA);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Consumes up to the catch-up cap; anything beyond stays for the next call.
    pub fn take_ticks(&mut self) -> u32 {
        let mut ticks = 0;
        while ticks < self.max_catch_up && self.consume_tick() {
            ticks += 1;
        }
        ticks
    }

    pub fn backlog(&self) -> u32 {
        (self.accumulator.as_nanos() / self.dt.as_nanos()) as u32
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}
