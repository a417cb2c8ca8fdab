// RowMon - Moving Averager
//
// Fixed-length moving average used to smooth the drag factor from stroke to
// stroke. Every slot starts at the seed value, so the first few calibrations
// are pulled towards the seed instead of jumping straight to a noisy sample.

use crate::config::MAX_DRAG_SMOOTHING;

pub struct MovingAverager {
    data_points: [f64; MAX_DRAG_SMOOTHING],
    length: usize,
    // Index of the most recently pushed value.
    newest: usize,
}

impl MovingAverager {
    pub fn new(length: usize, init_value: f64) -> Self {
        let length = length.clamp(1, MAX_DRAG_SMOOTHING);
        let mut averager = Self {
            data_points: [0.0; MAX_DRAG_SMOOTHING],
            length,
            newest: 0,
        };
        averager.reset(init_value);
        averager
    }

    pub fn push_value(&mut self, data_point: f64) {
        self.newest = (self.newest + 1) % self.length;
        self.data_points[self.newest] = data_point;
    }

    pub fn average(&self) -> f64 {
        self.data_points[..self.length].iter().sum::<f64>() / self.length as f64
    }

    pub fn reset(&mut self, init_value: f64) {
        self.data_points[..self.length].fill(init_value);
        self.newest = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_seed() {
        let avg = MovingAverager::new(5, 0.0002);
        assert!((avg.average() - 0.0002).abs() < 1e-15);
    }

    #[test]
    fn push_moves_average_towards_sample() {
        let mut avg = MovingAverager::new(4, 1.0);
        avg.push_value(5.0);
        assert!((avg.average() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn oldest_value_falls_out() {
        let mut avg = MovingAverager::new(2, 0.0);
        avg.push_value(2.0);
        avg.push_value(4.0);
        avg.push_value(6.0);
        assert!((avg.average() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn length_is_clamped_to_capacity() {
        let mut avg = MovingAverager::new(500, 1.0);
        for _ in 0..MAX_DRAG_SMOOTHING {
            avg.push_value(3.0);
        }
        assert!((avg.average() - 3.0).abs() < 1e-12);
    }
}
