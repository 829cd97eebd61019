//! Lap-scoped running statistics, one accumulator per wheel.

use model::{StatsSummary, Wheels, WheelsStats};

/// Running mean/variance (Welford) with min and max. NaN samples are skipped.
#[derive(Debug, Clone, Copy)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn update(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample variance; 0 for a single sample, NaN when empty.
    pub fn variance(&self) -> f64 {
        match self.count {
            0 => f64::NAN,
            1 => 0.0,
            n => self.m2 / (n - 1) as f64,
        }
    }

    pub fn summary(&self) -> StatsSummary {
        if self.count == 0 {
            return StatsSummary::EMPTY;
        }
        StatsSummary {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std: self.variance().sqrt(),
        }
    }
}

/// Four independent accumulators, reset at the start of every lap.
#[derive(Debug, Clone, Default)]
pub struct RunningWheelStats {
    wheels: Wheels<RunningStats>,
}

impl RunningWheelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, values: &Wheels<f64>) {
        for (w, v) in values.iter() {
            self.wheels[w].update(*v);
        }
    }

    pub fn reset(&mut self) {
        self.wheels = Wheels::default();
    }

    pub fn count(&self) -> u64 {
        self.wheels.iter().map(|(_, s)| s.count()).max().unwrap_or(0)
    }

    pub fn snapshot(&self) -> WheelsStats {
        self.wheels.map(RunningStats::summary)
    }

    pub fn means(&self) -> Wheels<f64> {
        self.wheels.map(RunningStats::mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Wheel;

    #[test]
    fn welford_matches_two_pass() {
        let mut s = RunningStats::new();
        for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
            s.update(x);
        }
        assert!((s.mean() - 3.0).abs() < 1e-12);
        assert!((s.variance() - 2.5).abs() < 1e-12);
        let sum = s.summary();
        assert_eq!(sum.min, 1.0);
        assert_eq!(sum.max, 5.0);
        assert!((sum.std - 2.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn empty_and_nan_only_read_as_unknown() {
        let mut s = RunningStats::new();
        assert!(s.summary().is_empty());
        s.update(f64::NAN);
        assert_eq!(s.count(), 0);
        assert!(s.mean().is_nan());
        s.update(7.0);
        assert_eq!(s.variance(), 0.0);
        assert_eq!(s.summary().min, 7.0);
    }

    #[test]
    fn wheels_accumulate_independently_and_reset() {
        let mut rw = RunningWheelStats::new();
        rw.update(&Wheels::new(26.0, 26.5, 27.0, 27.5));
        rw.update(&Wheels::new(28.0, 26.5, f64::NAN, 27.5));
        let snap = rw.snapshot();
        assert_eq!(snap[Wheel::FL].mean, 27.0);
        assert_eq!(snap[Wheel::FL].max, 28.0);
        assert_eq!(snap[Wheel::FR].std, 0.0);
        assert_eq!(snap[Wheel::RL].mean, 27.0);
        assert_eq!(rw.count(), 2);

        rw.reset();
        assert_eq!(rw.count(), 0);
        assert!(rw.snapshot()[Wheel::RR].is_empty());
        assert!(rw.means().fl.is_nan());
    }
}
