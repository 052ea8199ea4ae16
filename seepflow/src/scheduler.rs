// Frame pacing for the animation loop.
//
// The clock turns host timestamps into clamped frame deltas and a wrapping
// elapsed time. Cancelling it stops every later frame from running.

pub const MAX_FRAME_TIME: f32 = 1.0 / 10.0;
pub const MAX_ELAPSED_TIME: f32 = 1000.0;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FrameTiming {
    pub delta_time: f32,
    pub elapsed_time: f32,
    pub frame: u64,
}

#[derive(Clone, Debug, Default)]
pub struct FrameClock {
    last_timestamp: Option<f64>,
    elapsed_time: f32,
    frame: u64,
    cancelled: bool,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `timestamp` (milliseconds). Returns `None` once cancelled.
    pub fn tick(&mut self, timestamp: f64) -> Option<FrameTiming> {
        if self.cancelled {
            return None;
        }

        let delta_time = match self.last_timestamp {
            Some(last) => (((timestamp - last) / 1000.0) as f32).clamp(0.0, MAX_FRAME_TIME),
            None => 0.0,
        };
        self.last_timestamp = Some(timestamp);

        // Reset the animation timer to avoid precision issues
        self.elapsed_time += delta_time;
        let timer_overflow = self.elapsed_time - MAX_ELAPSED_TIME;
        if timer_overflow >= 0.0 {
            self.elapsed_time = timer_overflow;
        }

        let timing = FrameTiming {
            delta_time,
            elapsed_time: self.elapsed_time,
            frame: self.frame,
        };
        self.frame += 1;

        Some(timing)
    }

    pub fn cancel(&mut self) {
        if !self.cancelled {
            log::debug!("Frame clock cancelled after {} frames", self.frame);
        }
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn elapsed_time(&self) -> f32 {
        self.elapsed_time
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_frame_has_no_delta() {
        let mut clock = FrameClock::new();
        let timing = clock.tick(5_000.0).unwrap();
        assert_eq!(timing.delta_time, 0.0);
        assert_eq!(timing.frame, 0);
    }

    #[test]
    fn delta_is_in_seconds() {
        let mut clock = FrameClock::new();
        clock.tick(0.0);
        let timing = clock.tick(16.0).unwrap();
        assert_relative_eq!(timing.delta_time, 0.016, epsilon = 1e-6);
        assert_relative_eq!(timing.elapsed_time, 0.016, epsilon = 1e-6);
        assert_eq!(timing.frame, 1);
    }

    #[test]
    fn long_pauses_are_clamped() {
        let mut clock = FrameClock::new();
        clock.tick(0.0);
        assert_eq!(clock.tick(60_000.0).unwrap().delta_time, MAX_FRAME_TIME);
    }

    #[test]
    fn timestamps_going_backwards_do_not_rewind() {
        let mut clock = FrameClock::new();
        clock.tick(1_000.0);
        assert_eq!(clock.tick(500.0).unwrap().delta_time, 0.0);
    }

    #[test]
    fn elapsed_time_wraps() {
        let mut clock = FrameClock {
            elapsed_time: MAX_ELAPSED_TIME - 0.05,
            ..Default::default()
        };
        clock.tick(0.0);
        let timing = clock.tick(100.0).unwrap();
        assert_relative_eq!(timing.elapsed_time, 0.05, epsilon = 1e-3);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut clock = FrameClock::new();
        clock.tick(0.0);
        clock.cancel();
        clock.cancel();
        assert!(clock.is_cancelled());
        assert_eq!(clock.tick(16.0), None);
        assert_eq!(clock.frame(), 1);
    }
}
