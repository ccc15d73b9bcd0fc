//! Jittered backoff schedule for webhook redelivery

use rand::Rng;
use std::time::Duration;

/// Fixed redelivery stages with multiplicative jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSchedule {
    /// Base delay of each stage
    pub stages: Vec<Duration>,

    /// Jitter fraction; a delay is scaled by a factor in `[1 - jitter, 1 + jitter]`
    pub jitter: f64,
}

/// 30s, 2m, 10m, 30m and 2h with 20% jitter.
///
/// Five stages allow five deliveries, so only the first four stages are ever
/// waited out. The 2h stage only marks the end of the schedule; append a
/// stage to actually wait 2h before a sixth delivery.
impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            stages: vec![
                Duration::from_secs(30),
                Duration::from_secs(2 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(30 * 60),
                Duration::from_secs(2 * 60 * 60),
            ],
            jitter: 0.2,
        }
    }
}

impl BackoffSchedule {
    /// Create a schedule from stages and a jitter fraction.
    ///
    /// The fraction is clamped to `[0, 1)`.
    pub fn new(stages: Vec<Duration>, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 0.99)
        } else {
            0.0
        };
        Self { stages, jitter }
    }

    /// Same stages, no jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Delay before the next delivery after `failures` consecutive failed
    /// deliveries, or `None` once the schedule is exhausted.
    ///
    /// The schedule is exhausted when `failures` reaches the number of
    /// stages, so a five-stage schedule allows five deliveries in total.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures as usize >= self.stages.len() {
            return None;
        }
        self.stages
            .get(failures as usize - 1)
            .map(|base| self.jittered(*base))
    }

    /// Apply multiplicative jitter to a base delay.
    pub fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule.stages[0], Duration::from_secs(30));
        assert_eq!(schedule.stages[4], Duration::from_secs(7200));
        assert_eq!(schedule.jitter, 0.2);

        let last = *schedule.stages.last().unwrap();
        let waited: Vec<Duration> = (1..=10)
            .filter_map(|failures| schedule.clone().without_jitter().delay_for(failures))
            .collect();
        assert_eq!(waited.len(), 4);
        assert!(!waited.contains(&last));
    }

    #[test]
    fn test_delay_for_without_jitter() {
        let schedule = BackoffSchedule::default().without_jitter();

        assert_eq!(schedule.delay_for(0), None);
        assert_eq!(schedule.delay_for(1), Some(Duration::from_secs(30)));
        assert_eq!(schedule.delay_for(2), Some(Duration::from_secs(120)));
        assert_eq!(schedule.delay_for(4), Some(Duration::from_secs(1800)));
        assert_eq!(schedule.delay_for(5), None);
        assert_eq!(schedule.delay_for(6), None);
    }

    #[test]
    fn test_jitter_bounds() {
        let schedule = BackoffSchedule::default();
        let base = Duration::from_secs(100);

        for _ in 0..200 {
            let delay = schedule.jittered(base);
            assert!(delay >= Duration::from_secs(80));
            assert!(delay <= Duration::from_secs(120));
        }
    }

    #[test]
    fn test_jitter_clamped() {
        assert_eq!(BackoffSchedule::new(vec![], -1.0).jitter, 0.0);
        assert_eq!(BackoffSchedule::new(vec![], 5.0).jitter, 0.99);
        assert_eq!(BackoffSchedule::new(vec![], f64::NAN).jitter, 0.0);
    }

    #[test]
    fn test_empty_schedule_never_retries() {
        let schedule = BackoffSchedule::new(Vec::new(), 0.2);
        assert!(schedule.is_empty());
        assert_eq!(schedule.delay_for(1), None);
    }
}
