use std::time::Duration;

/// Long-horizon DLQ retry delays by 1-based attempt index, clamped to the
/// last step once the schedule runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    steps: Vec<Duration>,
}

impl RetrySchedule {
    /// An empty schedule falls back to the default steps
    pub fn new(steps: Vec<Duration>) -> Self {
        if steps.is_empty() {
            return Self::default();
        }
        Self { steps }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.steps.len() - 1);
        self.steps[index]
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            steps: [60, 300, 1_800, 7_200, 21_600]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}
