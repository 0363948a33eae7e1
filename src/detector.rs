use std::time::{Duration, Instant};

use tracing::debug;

// 一定間隔ごとに食事の総数を比べ、増えていなければデッドロックとみなす
// あくまで推定で、遅いだけの実行も引っかかるし、区間の境目次第では1区間遅れて報告することもある
#[derive(Debug, Clone)]
pub struct DeadlockDetector {
    interval: Duration,
    sample: Option<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    total_meals: i64,
}

impl DeadlockDetector {
    pub fn new(interval: Duration) -> Self {
        DeadlockDetector {
            interval,
            sample: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn poll(&mut self, total_meals: i64) -> bool {
        self.poll_at(Instant::now(), total_meals)
    }

    // 初回は記録するだけ。以降は interval 以上経っていれば比較し、結果に関係なく記録し直す
    pub fn poll_at(&mut self, now: Instant, total_meals: i64) -> bool {
        let Some(sample) = self.sample else {
            self.sample = Some(Sample {
                at: now,
                total_meals,
            });
            return false;
        };

        if now.saturating_duration_since(sample.at) < self.interval {
            return false;
        }

        self.sample = Some(Sample {
            at: now,
            total_meals,
        });
        let stalled = total_meals == sample.total_meals;
        debug!(
            previous = sample.total_meals,
            current = total_meals,
            stalled,
            "deadlock check"
        );
        stalled
    }
}
