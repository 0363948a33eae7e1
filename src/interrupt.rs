use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted")]
pub struct Interrupted;

// 実行ユニットごとの割り込みトークン
// 一度立てたら戻らない。以降の待機 (sleep, フォークの取得) はすべて即座に Interrupted を返す
#[derive(Debug, Default)]
pub struct Interrupt {
    interrupted: Mutex<bool>,
    cond: Condvar,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        let mut interrupted = self
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *interrupted = true;
        // 眠っているユニットを起こす
        self.cond.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        *self
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // duration だけ待機する。割り込まれたらその時点で Err(Interrupted)
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let interrupted = self
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (interrupted, _) = self
            .cond
            .wait_timeout_while(interrupted, duration, |interrupted| !*interrupted)
            .unwrap_or_else(PoisonError::into_inner);

        if *interrupted {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn test_sleep_runs_full_duration() {
        let interrupt = Interrupt::new();
        let start = Instant::now();
        assert_eq!(interrupt.sleep(Duration::from_millis(20)), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_interrupt_wakes_sleeper() {
        let interrupt = Arc::new(Interrupt::new());
        let sleeper = interrupt.clone();
        let start = Instant::now();
        let t = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        interrupt.interrupt();

        assert_eq!(t.join().unwrap(), Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_interrupt_is_sticky() {
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        assert!(interrupt.is_interrupted());
        assert_eq!(interrupt.sleep(Duration::from_secs(30)), Err(Interrupted));
        assert_eq!(interrupt.sleep(Duration::ZERO), Err(Interrupted));
    }
}
