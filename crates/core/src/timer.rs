//! Frame pacing.

use std::time::{Duration, Instant};

/// Average frame time over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frames: u32,
    pub window: Duration,
}

impl FrameReport {
    pub fn average_frame_ms(&self) -> f32 {
        if self.frames == 0 {
            return 0.0;
        }
        self.window.as_secs_f32() * 1000.0 / self.frames as f32
    }

    pub fn fps(&self) -> f32 {
        let secs = self.window.as_secs_f32();
        if secs == 0.0 { 0.0 } else { self.frames as f32 / secs }
    }
}

/// Wall-clock timer ticked once per drawn frame.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Time since creation or the last [`reset`](Self::reset).
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Marks a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Returns a report once `interval` has passed since the last one.
    pub fn take_report(&mut self, interval: Duration) -> Option<FrameReport> {
        self.take_report_at(Instant::now(), interval)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn tick_at(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.window_frames += 1;
        delta
    }

    fn take_report_at(&mut self, now: Instant, interval: Duration) -> Option<FrameReport> {
        let window = now.saturating_duration_since(self.window_start);
        if window < interval {
            return None;
        }
        let report = FrameReport {
            frames: self.window_frames,
            window,
        };
        self.window_start = now;
        self.window_frames = 0;
        Some(report)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames_into_report() {
        let mut timer = Timer::new();
        let base = timer.window_start;

        for i in 1..=4u64 {
            timer.tick_at(base + Duration::from_millis(10 * i));
        }

        assert!(timer.take_report_at(base + Duration::from_millis(30), Duration::from_millis(40)).is_none());

        let report = timer
            .take_report_at(base + Duration::from_millis(40), Duration::from_millis(40))
            .unwrap();
        assert_eq!(report.frames, 4);
        assert!((report.average_frame_ms() - 10.0).abs() < 1e-3);
        assert!((report.fps() - 100.0).abs() < 1e-2);
    }

    #[test]
    fn test_report_restarts_window() {
        let mut timer = Timer::new();
        let base = timer.window_start;
        timer.tick_at(base + Duration::from_millis(5));
        timer
            .take_report_at(base + Duration::from_millis(10), Duration::from_millis(10))
            .unwrap();

        let empty = timer
            .take_report_at(base + Duration::from_millis(20), Duration::from_millis(10))
            .unwrap();
        assert_eq!(empty.frames, 0);
        assert_eq!(empty.average_frame_ms(), 0.0);
    }

    #[test]
    fn test_tick_returns_delta() {
        let mut timer = Timer::new();
        let base = timer.last_tick;
        assert_eq!(timer.tick_at(base + Duration::from_millis(16)), Duration::from_millis(16));
        assert_eq!(timer.tick_at(base + Duration::from_millis(20)), Duration::from_millis(4));
    }

    #[test]
    fn test_reset_restarts_elapsed() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        timer.reset();
        assert!(timer.elapsed() < Duration::from_millis(5));
        assert_eq!(timer.window_frames, 0);
    }
}
