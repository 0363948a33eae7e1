use std::{fmt::Write, time::Duration};

use crate::{config::DinnerConfig, table::Table};

pub fn configuration(config: &DinnerConfig, detect_deadlock: bool) -> String {
    let timing = &config.timing;
    let mut s = String::from("Configuration:\n");
    let _ = writeln!(s, "  Number of philosophers: {}", config.philosophers);
    let _ = writeln!(s, "  Think time:             {} milliseconds", timing.think.as_millis());
    let _ = writeln!(s, "  Eat time:               {} milliseconds", timing.eat.as_millis());
    let _ = writeln!(s, "  Fork time:              {} milliseconds", timing.fork.as_millis());
    let _ = writeln!(s, "  Inter-launch wait time: {} milliseconds", timing.pause.as_millis());
    let _ = writeln!(s, "  Status interval:        {} milliseconds", config.status_interval.as_millis());
    if detect_deadlock {
        let _ = writeln!(s, "  Deadlock interval:      {} milliseconds", config.deadlock_interval.as_millis());
    }
    let _ = write!(
        s,
        "  Status iterations:      {} (about {} seconds)",
        config.iterations,
        config.planned_run().as_secs()
    );
    s
}

pub fn summary(table: &Table, elapsed: Option<Duration>) -> String {
    let timing = table.timing();
    let mut s = String::from("Results:\n");
    let _ = writeln!(s, "  Total number of eatings: {}", table.total_meals());
    let _ = writeln!(s, "  Maximum meals:           {}", table.max_meals());
    let _ = writeln!(s, "  Minimum meals:           {}", table.min_meals());
    let _ = write!(s, "  Average meals:           {:.2}", table.average_meals());
    for phil in table.philosophers() {
        let _ = write!(
            s,
            "\n    {}: {} meals ({} ms eating), {} thoughts ({} ms thinking)",
            phil.name(),
            phil.meals(),
            phil.eat_time_total(timing).as_millis(),
            phil.thoughts(),
            phil.think_time_total(timing).as_millis(),
        );
    }
    if let Some(elapsed) = elapsed {
        let _ = write!(s, "\nElapsed time: {:.3}s", elapsed.as_secs_f64());
    }
    s
}
