use std::time::Duration;

use crate::config::Sending;
use crate::job::JobKind;

/// Fixed-delay rate limiter, one budget per job kind.
///
/// The two budgets aren't coordinated. Newsletter and autoresponder runs may
/// interleave, so their rates are configured to fit the relay's limit when
/// added together.
#[derive(Clone, Copy, Debug)]
pub struct Pacer {
    newsletter: Duration,
    autoresponder: Duration,
}

impl Pacer {
    /// Rates are messages per second, zero disables pacing.
    pub fn new(newsletter_rate: u32, autoresponder_rate: u32) -> Self {
        Self {
            newsletter: interval_for(newsletter_rate),
            autoresponder: interval_for(autoresponder_rate),
        }
    }

    pub fn from_config(sending: &Sending) -> Self {
        Self::new(sending.newsletter_rate, sending.autoresponder_rate)
    }

    pub fn interval(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Newsletter => self.newsletter,
            JobKind::Autoresponder => self.autoresponder,
        }
    }

    /// Waits out one interval. Called after every send attempt, failed ones
    /// included.
    pub async fn pace(&self, kind: JobKind) {
        let interval = self.interval(kind);
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
}

fn interval_for(rate: u32) -> Duration {
    if rate == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / rate
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[test]
    fn interval_is_one_second_over_rate() {
        let pacer = Pacer::new(10, 2);
        assert_eq!(pacer.interval(JobKind::Newsletter), Duration::from_millis(100));
        assert_eq!(pacer.interval(JobKind::Autoresponder), Duration::from_millis(500));
        assert_eq!(Pacer::new(0, 0).interval(JobKind::Newsletter), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn pace_sleeps_for_the_kind_interval() {
        let pacer = Pacer::new(10, 2);
        let start = Instant::now();
        pacer.pace(JobKind::Autoresponder).await;
        pacer.pace(JobKind::Newsletter).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
    }
}
