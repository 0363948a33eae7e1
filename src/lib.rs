pub mod config;
pub mod detector;
pub mod fork;
pub mod interrupt;
pub mod philosopher;
pub mod report;
pub mod table;

pub use config::{DinnerConfig, Timing};
pub use detector::DeadlockDetector;
pub use fork::{Fork, ForkError, Owner};
pub use interrupt::{Interrupt, Interrupted};
pub use philosopher::{Holding, Philosopher, State};
pub use table::{Table, TableError};
