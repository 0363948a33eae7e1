use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{
    config::Timing,
    fork::{Fork, ForkError, Owner},
    interrupt::Interrupt,
    table::{Seating, TableError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Thinking = 1,
    Eating = 2,
    AcquiringFork = 3,
    ReleasingFork = 4,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            1 => State::Thinking,
            2 => State::Eating,
            3 => State::AcquiringFork,
            4 => State::ReleasingFork,
            _ => State::Idle,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Idle => "IDLE",
            State::Thinking => "THINKING",
            State::Eating => "EATING",
            State::AcquiringFork => "PICKING_UP_FORK",
            State::ReleasingFork => "PUTTING_DOWN_FORK",
        };
        f.write_str(s)
    }
}

// この席が今どのフォークを持っているか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holding {
    Neither,
    Left,
    Right,
    Both,
}

// 1サイクルを途中で打ち切った理由
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fork(#[from] ForkError),

    #[error("interrupted while {0}")]
    Interrupted(State),
}

pub struct Philosopher {
    name: String,
    seat: usize,
    seating: Arc<Seating>,
    // 状態とカウンタを書き込むのは自分のスレッドだけ
    state: AtomicU8,
    meals: AtomicU64,
    thoughts: AtomicU64,
}

impl Philosopher {
    pub fn new(
        name: impl Into<String>,
        seat: usize,
        seating: Arc<Seating>,
    ) -> Result<Self, TableError> {
        // 席番号の範囲はここで検証しておく
        seating.left_fork(seat)?;
        seating.right_fork(seat)?;

        Ok(Philosopher {
            name: name.into(),
            seat,
            seating,
            state: AtomicU8::new(State::Idle as u8),
            meals: AtomicU64::new(0),
            thoughts: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seat(&self) -> usize {
        self.seat
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn meals(&self) -> u64 {
        self.meals.load(Ordering::Acquire)
    }

    pub fn thoughts(&self) -> u64 {
        self.thoughts.load(Ordering::Acquire)
    }

    pub fn eat_time_total(&self, timing: &Timing) -> Duration {
        timing.eat.saturating_mul(saturating_u32(self.meals()))
    }

    pub fn think_time_total(&self, timing: &Timing) -> Duration {
        timing.think.saturating_mul(saturating_u32(self.thoughts()))
    }

    pub fn left_fork(&self) -> &Fork {
        self.seating.adjacent_forks(self.seat).0
    }

    pub fn right_fork(&self) -> &Fork {
        self.seating.adjacent_forks(self.seat).1
    }

    pub fn holding(&self) -> Holding {
        let mine = Owner::Seat(self.seat);
        let left = self.left_fork().owner() == mine;
        let right = self.right_fork().owner() == mine;
        match (left, right) {
            (true, true) => Holding::Both,
            (true, false) => Holding::Left,
            (false, true) => Holding::Right,
            (false, false) => Holding::Neither,
        }
    }

    pub fn status(&self) -> String {
        let (left, right) = self.seating.adjacent_forks(self.seat);
        let holding = match self.holding() {
            Holding::Both => "both forks".to_string(),
            Holding::Neither => "neither fork".to_string(),
            Holding::Left => format!("the left fork ({})", left.name()),
            Holding::Right => format!("the right fork ({})", right.name()),
        };

        format!(
            "{} is assigned forks l: {} and r: {}, has eaten {} times, and currently is holding {} in state {}",
            self.name,
            left.name(),
            right.name(),
            self.meals(),
            holding,
            self.state(),
        )
    }

    // 実行ユニットの本体。パーティが終わるまで考えて食べるを繰り返す
    pub fn run(&self, timing: &Timing, interrupt: &Interrupt) {
        debug!(philosopher = %self.name, seat = self.seat, "sits down");

        while self.seating.party_is_on() {
            if let Err(err) = self.think(timing, interrupt) {
                info!(philosopher = %self.name, %err, "stopped thinking");
                continue;
            }
            if let Err(err) = self.eat(timing, interrupt) {
                info!(philosopher = %self.name, %err, "stopped eating");
            }
        }

        self.set_state(State::Idle);
        debug!(
            philosopher = %self.name,
            meals = self.meals(),
            thoughts = self.thoughts(),
            "leaves the table"
        );
    }

    fn think(&self, timing: &Timing, interrupt: &Interrupt) -> Result<(), CycleError> {
        self.set_state(State::Thinking);
        self.hold(timing.think, interrupt)?;
        self.set_state(State::Idle);
        self.thoughts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn eat(&self, timing: &Timing, interrupt: &Interrupt) -> Result<(), CycleError> {
        let result = self.try_eat(timing, interrupt);
        if result.is_err() {
            // 打ち切った場合は手元のフォークを置いてから戻る
            self.put_down_held();
            self.set_state(State::Idle);
        }
        result
    }

    // 取るときも置くときも常に左 -> 右の順
    fn try_eat(&self, timing: &Timing, interrupt: &Interrupt) -> Result<(), CycleError> {
        let (left, right) = self.seating.adjacent_forks(self.seat);

        self.set_state(State::AcquiringFork);
        self.pick_up(left, interrupt)?;
        self.hold(timing.fork, interrupt)?;
        self.pick_up(right, interrupt)?;
        self.hold(timing.fork, interrupt)?;

        self.set_state(State::Eating);
        self.hold(timing.eat, interrupt)?;

        self.set_state(State::ReleasingFork);
        self.hold(timing.fork, interrupt)?;
        self.put_down(left);
        self.hold(timing.fork, interrupt)?;
        self.put_down(right);

        self.meals.fetch_add(1, Ordering::AcqRel);
        self.set_state(State::Idle);
        Ok(())
    }

    fn pick_up(&self, fork: &Fork, interrupt: &Interrupt) -> Result<(), CycleError> {
        match fork.acquire(self.seat, interrupt) {
            Ok(()) => Ok(()),
            // 既に持っているなら報告だけして続行
            Err(err @ ForkError::AlreadyHeld { .. }) => {
                warn!(philosopher = %self.name, %err, "usage error");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn put_down(&self, fork: &Fork) {
        if let Err(err) = fork.release(self.seat) {
            warn!(philosopher = %self.name, %err, "usage error");
        }
    }

    fn put_down_held(&self) {
        let (left, right) = self.seating.adjacent_forks(self.seat);
        for fork in [left, right] {
            if fork.owner() == Owner::Seat(self.seat) {
                self.put_down(fork);
            }
        }
    }

    fn hold(&self, duration: Duration, interrupt: &Interrupt) -> Result<(), CycleError> {
        interrupt
            .sleep(duration)
            .map_err(|_| CycleError::Interrupted(self.state()))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
        trace!(philosopher = %self.name, %state, "state");
        thread::yield_now();
    }
}

impl fmt::Debug for Philosopher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Philosopher")
            .field("name", &self.name)
            .field("seat", &self.seat)
            .field("state", &self.state())
            .field("meals", &self.meals())
            .field("thoughts", &self.thoughts())
            .finish()
    }
}

fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
