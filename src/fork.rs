use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::interrupt::Interrupt;

// フォークの持ち主
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Unowned,
    Seat(usize),
    // 終了処理中。どの席も取得できない
    ShuttingDown,
}

impl Owner {
    pub fn seat(self) -> Option<usize> {
        match self {
            Owner::Seat(seat) => Some(seat),
            _ => None,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Unowned => write!(f, "no one"),
            Owner::Seat(seat) => write!(f, "seat {seat}"),
            Owner::ShuttingDown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForkError {
    #[error("{fork}: seat {seat} attempted to pick up a fork it already holds")]
    AlreadyHeld { fork: String, seat: usize },

    #[error("{fork}: seat {seat} attempted to put down a fork never picked up")]
    NotHeld { fork: String, seat: usize },

    #[error("{fork}: seat {seat} attempted to put down a fork held by {owner}")]
    NotOwner {
        fork: String,
        seat: usize,
        owner: Owner,
    },

    #[error("{fork}: interrupted while picking up")]
    Interrupted { fork: String },

    #[error("{fork}: table is shutting down")]
    Closed { fork: String },
}

// 二値セマフォとしてのフォーク。持ち主を席番号で記録する
#[derive(Debug)]
pub struct Fork {
    name: String,
    owner: Mutex<Owner>,
    cond: Condvar,
}

impl Fork {
    pub fn new(name: impl Into<String>) -> Self {
        Fork {
            name: name.into(),
            owner: Mutex::new(Owner::Unowned),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Owner {
        *self.lock()
    }

    pub fn is_held(&self) -> bool {
        matches!(self.owner(), Owner::Seat(_))
    }

    /// フォークが空くまで待ってから `seat` を持ち主にする
    ///
    /// - 既に自分が持っている場合は待たずにエラー
    /// - `interrupt` が立ったら [`ForkError::Interrupted`] で中断。持ち主は変わらない
    /// - 終了処理で置かれたフォークは二度と取得できない
    pub fn acquire(&self, seat: usize, interrupt: &Interrupt) -> Result<(), ForkError> {
        let mut owner = self.lock();
        if *owner == Owner::Seat(seat) {
            return Err(ForkError::AlreadyHeld {
                fork: self.name.clone(),
                seat,
            });
        }

        loop {
            if interrupt.is_interrupted() {
                // 自分が消費した通知を次の待ち手に回す
                if *owner == Owner::Unowned {
                    self.cond.notify_one();
                }
                return Err(ForkError::Interrupted {
                    fork: self.name.clone(),
                });
            }

            match *owner {
                Owner::Unowned => {
                    *owner = Owner::Seat(seat);
                    trace!(fork = %self.name, seat, "picked up");
                    return Ok(());
                }
                Owner::ShuttingDown => {
                    return Err(ForkError::Closed {
                        fork: self.name.clone(),
                    });
                }
                Owner::Seat(_) => {
                    owner = self
                        .cond
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    pub fn release(&self, seat: usize) -> Result<(), ForkError> {
        let mut owner = self.lock();
        match *owner {
            Owner::Seat(holder) if holder == seat => {
                *owner = Owner::Unowned;
                self.cond.notify_one();
                trace!(fork = %self.name, seat, "put down");
                Ok(())
            }
            Owner::Unowned => Err(ForkError::NotHeld {
                fork: self.name.clone(),
                seat,
            }),
            // 他の席が持っている場合は何もしない
            other => Err(ForkError::NotOwner {
                fork: self.name.clone(),
                seat,
                owner: other,
            }),
        }
    }

    // 終了処理用。持ち主に関係なく置き、以後は誰も取得できないようにする
    // 既に誰も持っていなくてもエラーにはしない。直前の持ち主を返す
    pub fn release_for_shutdown(&self) -> Owner {
        let mut owner = self.lock();
        let previous = *owner;
        *owner = Owner::ShuttingDown;
        self.cond.notify_one();

        if previous == Owner::Unowned || previous == Owner::ShuttingDown {
            debug!(fork = %self.name, %previous, "shutdown release of a free fork");
        } else {
            debug!(fork = %self.name, %previous, "shutdown release");
        }
        previous
    }

    // 割り込みを立てた後に呼ぶ。待機中のユニット全員にトークンを確認させる
    pub fn wake_waiters(&self) {
        let _owner = self.lock();
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_acquire_release() {
        let fork = Fork::new("Fork 1");
        let interrupt = Interrupt::new();

        assert!(!fork.is_held());
        fork.acquire(3, &interrupt).unwrap();
        assert!(fork.is_held());
        assert_eq!(fork.owner(), Owner::Seat(3));

        fork.release(3).unwrap();
        assert!(!fork.is_held());
        assert_eq!(fork.owner(), Owner::Unowned);
    }

    #[test]
    fn test_double_acquire_does_not_block() {
        let fork = Fork::new("Fork 1");
        let interrupt = Interrupt::new();
        fork.acquire(0, &interrupt).unwrap();

        let err = fork.acquire(0, &interrupt).unwrap_err();
        assert!(matches!(err, ForkError::AlreadyHeld { seat: 0, .. }));
        assert_eq!(fork.owner(), Owner::Seat(0));
    }

    #[test]
    fn test_release_unheld() {
        let fork = Fork::new("Fork 2");
        let err = fork.release(1).unwrap_err();
        assert!(matches!(err, ForkError::NotHeld { seat: 1, .. }));
        assert_eq!(fork.owner(), Owner::Unowned);
    }

    #[test]
    fn test_release_by_non_owner_is_noop() {
        let fork = Fork::new("Fork 2");
        fork.acquire(1, &Interrupt::new()).unwrap();

        let err = fork.release(2).unwrap_err();
        assert_eq!(
            err,
            ForkError::NotOwner {
                fork: "Fork 2".to_string(),
                seat: 2,
                owner: Owner::Seat(1),
            }
        );
        assert_eq!(fork.owner(), Owner::Seat(1));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let fork = Arc::new(Fork::new("Fork 1"));
        fork.acquire(0, &Interrupt::new()).unwrap();

        let fork0 = fork.clone();
        let t = thread::spawn(move || fork0.acquire(1, &Interrupt::new()));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(fork.owner(), Owner::Seat(0));
        fork.release(0).unwrap();

        t.join().unwrap().unwrap();
        assert_eq!(fork.owner(), Owner::Seat(1));
    }

    #[test]
    fn test_interrupt_aborts_blocked_acquire() {
        let fork = Arc::new(Fork::new("Fork 1"));
        fork.acquire(0, &Interrupt::new()).unwrap();

        let interrupt = Arc::new(Interrupt::new());
        let fork0 = fork.clone();
        let interrupt0 = interrupt.clone();
        let t = thread::spawn(move || fork0.acquire(1, &interrupt0));

        thread::sleep(Duration::from_millis(20));
        interrupt.interrupt();
        fork.wake_waiters();

        let err = t.join().unwrap().unwrap_err();
        assert!(matches!(err, ForkError::Interrupted { .. }));
        assert_eq!(fork.owner(), Owner::Seat(0));
    }

    #[test]
    fn test_shutdown_release() {
        let fork = Arc::new(Fork::new("Fork 1"));
        fork.acquire(0, &Interrupt::new()).unwrap();

        let fork0 = fork.clone();
        let t = thread::spawn(move || fork0.acquire(1, &Interrupt::new()));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(fork.release_for_shutdown(), Owner::Seat(0));
        assert_eq!(fork.owner(), Owner::ShuttingDown);
        assert!(!fork.is_held());

        // 待っていた側も取得できずに戻ってくる
        let err = t.join().unwrap().unwrap_err();
        assert!(matches!(err, ForkError::Closed { .. }));

        // 元の持ち主が置こうとしても状態は変わらない
        assert!(matches!(
            fork.release(0),
            Err(ForkError::NotOwner {
                owner: Owner::ShuttingDown,
                ..
            })
        ));
        assert_eq!(fork.owner(), Owner::ShuttingDown);
    }

    #[test]
    fn test_shutdown_release_is_idempotent() {
        let fork = Fork::new("Fork 1");
        assert_eq!(fork.release_for_shutdown(), Owner::Unowned);
        assert_eq!(fork.release_for_shutdown(), Owner::ShuttingDown);
        assert!(!fork.is_held());
    }

    #[test]
    fn test_mutual_exclusion() {
        const NUM_THREADS: usize = 4;
        const NUM_LOOP: usize = 1000;

        let fork = Arc::new(Fork::new("Fork 1"));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut v = Vec::new();

        for seat in 0..NUM_THREADS {
            let fork0 = fork.clone();
            let inside0 = inside.clone();
            let t = thread::spawn(move || {
                let interrupt = Interrupt::new();
                for _ in 0..NUM_LOOP {
                    fork0.acquire(seat, &interrupt).unwrap();
                    assert_eq!(fork0.owner(), Owner::Seat(seat));
                    assert_eq!(inside0.fetch_add(1, Ordering::SeqCst), 0);
                    inside0.fetch_sub(1, Ordering::SeqCst);
                    fork0.release(seat).unwrap();
                }
            });
            v.push(t);
        }

        for t in v {
            t.join().unwrap();
        }
        assert_eq!(fork.owner(), Owner::Unowned);
    }
}
