use std::time::Duration;

use rand::Rng;

pub const DEFAULT_PHILOSOPHERS: usize = 5;
pub const DEFAULT_THINK_MS: u64 = 1000;
pub const DEFAULT_EAT_MS: u64 = 1000;
pub const DEFAULT_FORK_MS: u64 = 1000;
pub const DEFAULT_PAUSE_MS: u64 = 90;
pub const DEFAULT_STATUS_MS: u64 = 6000;
pub const DEFAULT_DEADLOCK_MS: u64 = 3000;
pub const DEFAULT_ITERATIONS: usize = 7;

// 起動間隔をフォーク時間からずらす幅 (ミリ秒)
const PAUSE_JITTER_MS: (i64, i64) = (-8, 10);

// 全哲学者で共有する時間設定。生成後は変更しない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub think: Duration,
    pub eat: Duration,
    // フォークを取る、置くのにかかる時間
    pub fork: Duration,
    // 哲学者を起動する間隔
    pub pause: Duration,
}

impl Timing {
    pub const ZERO: Timing = Timing {
        think: Duration::ZERO,
        eat: Duration::ZERO,
        fork: Duration::ZERO,
        pause: Duration::ZERO,
    };

    pub fn from_millis(think: u64, eat: u64, fork: u64, pause: u64) -> Self {
        Timing {
            think: Duration::from_millis(think),
            eat: Duration::from_millis(eat),
            fork: Duration::from_millis(fork),
            pause: Duration::from_millis(pause),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing::from_millis(
            DEFAULT_THINK_MS,
            DEFAULT_EAT_MS,
            DEFAULT_FORK_MS,
            DEFAULT_PAUSE_MS,
        )
    }
}

// 起動間隔 = フォーク時間 + [-8, 10] ms の乱数。0 未満にはならない
pub fn jittered_pause(fork: Duration) -> Duration {
    let offset = rand::thread_rng().gen_range(PAUSE_JITTER_MS.0..=PAUSE_JITTER_MS.1);
    let millis = (fork.as_millis() as i64).saturating_add(offset).max(0);
    Duration::from_millis(millis as u64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DinnerConfig {
    pub philosophers: usize,
    pub timing: Timing,
    pub status_interval: Duration,
    pub deadlock_interval: Duration,
    pub iterations: usize,
}

impl DinnerConfig {
    // おおよその実行時間
    pub fn planned_run(&self) -> Duration {
        self.status_interval
            .saturating_mul(u32::try_from(self.iterations).unwrap_or(u32::MAX))
    }
}

impl Default for DinnerConfig {
    fn default() -> Self {
        let fork = Duration::from_millis(DEFAULT_FORK_MS);
        DinnerConfig {
            philosophers: DEFAULT_PHILOSOPHERS,
            timing: Timing {
                pause: jittered_pause(fork),
                ..Timing::default()
            },
            status_interval: Duration::from_millis(DEFAULT_STATUS_MS),
            deadlock_interval: Duration::from_millis(DEFAULT_DEADLOCK_MS),
            iterations: DEFAULT_ITERATIONS,
        }
    }
}
