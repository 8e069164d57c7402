use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::schedule::Clock;

/// Wall time derived from tokio's clock.
///
/// Time starts at `origin` and advances with [`tokio::time::Instant`], so
/// under a paused runtime sleeps complete instantly while schedules still
/// observe the simulated time passing.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    anchor: Instant,
}

impl TokioClock {
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed()).unwrap_or_default();
        self.origin + elapsed
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(wait) = (deadline - self.now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}
