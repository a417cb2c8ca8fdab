// RowMon - Moving Flank Detector
//
// Decides from the last few impulse intervals whether the flywheel is being
// driven (intervals shrinking) or coasting (intervals growing). A trend only
// counts once it holds across the whole window, so a single bouncy sample
// can never flip the stroke phase.

use crate::config::RowingSettings;

/// Upper bound for `RowingSettings::flank_length`.
pub const MAX_FLANK_LENGTH: usize = 12;

const WINDOW_CAPACITY: usize = MAX_FLANK_LENGTH + 1;

pub struct FlankDetector {
    // Ring buffer, `head` is the newest sample.
    samples: [f64; WINDOW_CAPACITY],
    head: usize,
    filled: usize,
    flank_length: usize,
    errors_allowed: usize,
}

impl FlankDetector {
    pub fn new(settings: &RowingSettings) -> Self {
        let flank_length = settings.flank_length.clamp(1, MAX_FLANK_LENGTH);
        if flank_length != settings.flank_length {
            log::warn!(
                "Flank length {} out of range, using {}",
                settings.flank_length,
                flank_length
            );
        }

        Self {
            samples: [0.0; WINDOW_CAPACITY],
            head: 0,
            filled: 0,
            flank_length,
            errors_allowed: settings.number_of_errors_allowed.min(flank_length - 1),
        }
    }

    pub fn flank_length(&self) -> usize {
        self.flank_length
    }

    fn window(&self) -> usize {
        self.flank_length + 1
    }

    /// Overwrite the oldest interval with `dt`.
    pub fn push_value(&mut self, dt: f64) {
        self.head = (self.head + 1) % self.window();
        self.samples[self.head] = dt;
        self.filled = (self.filled + 1).min(self.window());
    }

    /// The `age`-th most recent interval (0 = newest).
    fn sample(&self, age: usize) -> f64 {
        let window = self.window();
        self.samples[(self.head + window - age) % window]
    }

    fn is_full(&self) -> bool {
        self.filled == self.window()
    }

    /// Count adjacent pairs that break the trend `holds(newer, older)`.
    fn trend_errors(&self, holds: impl Fn(f64, f64) -> bool) -> usize {
        (0..self.flank_length)
            .filter(|&i| !holds(self.sample(i), self.sample(i + 1)))
            .count()
    }

    /// Flywheel accelerating: every interval shorter than the one before.
    pub fn is_flywheel_powered(&self) -> bool {
        self.is_full() && self.trend_errors(|newer, older| newer < older) <= self.errors_allowed
    }

    /// Flywheel decelerating: every interval longer than the one before.
    pub fn is_flywheel_unpowered(&self) -> bool {
        self.is_full() && self.trend_errors(|newer, older| newer > older) <= self.errors_allowed
    }

    /// Seconds elapsed since the current flank began, i.e. the sum of the
    /// intervals that make up the trend.
    pub fn time_to_begin_of_flank(&self) -> f64 {
        (0..self.flank_length.min(self.filled)).map(|i| self.sample(i)).sum()
    }

    pub fn reset(&mut self) {
        self.samples = [0.0; WINDOW_CAPACITY];
        self.head = 0;
        self.filled = 0;
    }
}
