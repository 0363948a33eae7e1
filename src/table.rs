use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{config::Timing, fork::Fork, interrupt::Interrupt, philosopher::Philosopher};

// デッドロックが起こり得る最小の人数
pub const MIN_SEATS: usize = 2;

pub const PARTY_IS_OVER: &str = "Party is over";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("must have at least {min} philosophers, got {0}", min = MIN_SEATS)]
    TooFewSeats(usize),

    #[error("seat {seat} is out of range for a table of {seats} seats")]
    SeatOutOfRange { seat: usize, seats: usize },

    #[error("table has not been populated")]
    NotPopulated,

    #[error("table has already been populated")]
    AlreadyPopulated,

    #[error("table has already been started")]
    AlreadyStarted,

    #[error("failed to spawn thread for seat {seat}")]
    Spawn {
        seat: usize,
        #[source]
        source: io::Error,
    },
}

// 哲学者のスレッドと共有する部分: フォークとパーティのフラグ
#[derive(Debug)]
pub struct Seating {
    forks: Vec<Fork>,
    party_is_on: Arc<AtomicBool>,
}

impl Seating {
    pub fn new(seats: usize, party_is_on: Arc<AtomicBool>) -> Self {
        let forks = (0..seats).map(|i| Fork::new(format!("Fork {}", i + 1))).collect();
        Seating { forks, party_is_on }
    }

    pub fn len(&self) -> usize {
        self.forks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forks.is_empty()
    }

    pub fn forks(&self) -> &[Fork] {
        &self.forks
    }

    pub fn party_is_on(&self) -> bool {
        self.party_is_on.load(Ordering::SeqCst)
    }

    pub(crate) fn set_party_is_on(&self, on: bool) {
        self.party_is_on.store(on, Ordering::SeqCst);
    }

    pub fn left_fork(&self, seat: usize) -> Result<&Fork, TableError> {
        self.check_seat(seat)?;
        Ok(&self.forks[seat])
    }

    pub fn right_fork(&self, seat: usize) -> Result<&Fork, TableError> {
        self.check_seat(seat)?;
        Ok(&self.forks[(seat + 1) % self.forks.len()])
    }

    // seat は検証済みであること (Philosopher::new で確認している)
    pub(crate) fn adjacent_forks(&self, seat: usize) -> (&Fork, &Fork) {
        let n = self.forks.len();
        (&self.forks[seat], &self.forks[(seat + 1) % n])
    }

    fn check_seat(&self, seat: usize) -> Result<(), TableError> {
        if seat < self.forks.len() {
            Ok(())
        } else {
            Err(TableError::SeatOutOfRange {
                seat,
                seats: self.forks.len(),
            })
        }
    }
}

// 哲学者1人分の実行ユニット
struct Unit {
    philosopher: Arc<Philosopher>,
    interrupt: Arc<Interrupt>,
    handle: Option<JoinHandle<()>>,
}

pub struct Table {
    seats: usize,
    timing: Arc<Timing>,
    party_is_on: Arc<AtomicBool>,
    seating: Option<Arc<Seating>>,
    units: Vec<Unit>,
    started: bool,
}

impl Table {
    pub fn new(seats: usize) -> Result<Self, TableError> {
        Self::with_timing(seats, Timing::default())
    }

    pub fn with_timing(seats: usize, timing: Timing) -> Result<Self, TableError> {
        if seats < MIN_SEATS {
            return Err(TableError::TooFewSeats(seats));
        }

        Ok(Table {
            seats,
            timing: Arc::new(timing),
            party_is_on: Arc::new(AtomicBool::new(true)),
            seating: None,
            units: Vec::with_capacity(seats),
            started: false,
        })
    }

    pub fn seats(&self) -> usize {
        self.seats
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    // start() より前なら変更できる
    pub fn set_timing(&mut self, timing: Timing) -> Result<(), TableError> {
        if self.started {
            return Err(TableError::AlreadyStarted);
        }
        self.timing = Arc::new(timing);
        Ok(())
    }

    pub fn is_populated(&self) -> bool {
        self.seating.is_some()
    }

    pub fn party_is_on(&self) -> bool {
        self.party_is_on.load(Ordering::SeqCst)
    }

    // 席ごとにフォークと哲学者、実行ユニットを作る。start() までは動かさない
    pub fn populate(&mut self) -> Result<(), TableError> {
        if self.seating.is_some() {
            return Err(TableError::AlreadyPopulated);
        }

        let seating = Arc::new(Seating::new(self.seats, self.party_is_on.clone()));
        let mut units = Vec::with_capacity(self.seats);
        for seat in 0..self.seats {
            let philosopher =
                Philosopher::new(format!("Phil {}", seat + 1), seat, seating.clone())?;
            units.push(Unit {
                philosopher: Arc::new(philosopher),
                interrupt: Arc::new(Interrupt::new()),
                handle: None,
            });
        }

        self.units = units;
        self.seating = Some(seating);
        info!(seats = self.seats, "table populated");
        Ok(())
    }

    // 席順に起動する。起動のたびに pause だけ待つ
    pub fn start(&mut self) -> Result<(), TableError> {
        if self.seating.is_none() {
            return Err(TableError::NotPopulated);
        }
        if self.started {
            return Err(TableError::AlreadyStarted);
        }
        self.started = true;

        let pause = self.timing.pause;
        for (seat, unit) in self.units.iter_mut().enumerate() {
            let philosopher = unit.philosopher.clone();
            let interrupt = unit.interrupt.clone();
            let timing = self.timing.clone();

            let handle = thread::Builder::new()
                .name(philosopher.name().to_string())
                .spawn(move || philosopher.run(&timing, &interrupt))
                .map_err(|source| TableError::Spawn { seat, source })?;
            unit.handle = Some(handle);

            // 次の席を起動するまで待つ
            thread::sleep(pause);
        }

        info!(seats = self.seats, ?pause, "table started");
        Ok(())
    }

    pub fn set_party_is_on(&mut self, on: bool) {
        self.party_is_on.store(on, Ordering::SeqCst);
        if !on {
            self.shut_down();
        }
    }

    pub fn stop(&mut self) {
        self.set_party_is_on(false);
    }

    // 1. フラグを倒す (呼び出し元) 2. 全員に割り込む 3. 全フォークを強制的に置く 4. 全員の終了を待つ
    fn shut_down(&mut self) {
        info!("Table: Shutting down. Interrupting all philosophers.");

        for unit in &self.units {
            unit.interrupt.interrupt();
        }

        if let Some(seating) = &self.seating {
            for fork in seating.forks() {
                fork.wake_waiters();
            }
            for fork in seating.forks() {
                fork.release_for_shutdown();
            }
        }

        for unit in &mut self.units {
            if let Some(handle) = unit.handle.take() {
                if handle.join().is_err() {
                    error!(philosopher = %unit.philosopher.name(), "thread panicked");
                }
            }
        }
    }

    pub fn status(&self) -> String {
        if !self.party_is_on() {
            return PARTY_IS_OVER.to_string();
        }

        let mut s = format!("Table status: table has {} seats\n", self.seats);
        for phil in self.philosophers() {
            s.push_str("  ");
            s.push_str(&phil.status());
            s.push('\n');
        }
        s
    }

    pub fn philosophers(&self) -> impl Iterator<Item = &Philosopher> {
        self.units.iter().map(|unit| unit.philosopher.as_ref())
    }

    pub fn philosopher(&self, seat: usize) -> Result<&Philosopher, TableError> {
        self.check_seat(seat)?;
        self.units
            .get(seat)
            .map(|unit| unit.philosopher.as_ref())
            .ok_or(TableError::NotPopulated)
    }

    pub fn left_fork(&self, seat: usize) -> Result<&Fork, TableError> {
        self.check_seat(seat)?;
        self.seating()?.left_fork(seat)
    }

    pub fn right_fork(&self, seat: usize) -> Result<&Fork, TableError> {
        self.check_seat(seat)?;
        self.seating()?.right_fork(seat)
    }

    // 席が空 (populate 前) なら -1
    pub fn total_meals(&self) -> i64 {
        if self.units.is_empty() {
            return -1;
        }
        self.philosophers().map(|phil| phil.meals() as i64).sum()
    }

    pub fn max_meals(&self) -> u64 {
        self.philosophers().map(Philosopher::meals).max().unwrap_or(0)
    }

    pub fn min_meals(&self) -> u64 {
        self.philosophers().map(Philosopher::meals).min().unwrap_or(0)
    }

    pub fn average_meals(&self) -> f64 {
        let sum: u64 = self.philosophers().map(Philosopher::meals).sum();
        sum as f64 / self.seats as f64
    }

    fn seating(&self) -> Result<&Seating, TableError> {
        self.seating.as_deref().ok_or(TableError::NotPopulated)
    }

    fn check_seat(&self, seat: usize) -> Result<(), TableError> {
        if seat < self.seats {
            Ok(())
        } else {
            Err(TableError::SeatOutOfRange {
                seat,
                seats: self.seats,
            })
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        // stop() し忘れたスレッドを残さない
        if self.units.iter().any(|unit| unit.handle.is_some()) {
            self.stop();
        }
    }
}
