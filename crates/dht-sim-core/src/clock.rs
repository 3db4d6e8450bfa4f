//! The simulation's single monotonic virtual clock.

/// Holds the current virtual time in ticks. `set_time` is the only mutator
/// during the main loop; advancing is performed by the scheduler, never
/// independently by a node or handler.
pub struct SimulationClock {
    time: u64,
    /// Relates a tick to wall-clock units for log display and scenario
    /// scripting; no real sleep is ever performed.
    pub tick_ms: u64,
}

impl SimulationClock {
    pub fn new(tick_ms: u64) -> Self {
        SimulationClock { time: 0, tick_ms }
    }

    pub fn get_time(&self) -> u64 {
        self.time
    }

    /// Advance to `time`. Returns `true` if the time actually changed —
    /// callers use this to decide whether to emit a `SIMULATION_TICK`
    /// (it fires once per distinct value, not once per call).
    pub fn set_time(&mut self, time: u64) -> bool {
        if time != self.time {
            self.time = time;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_time_reports_change_only_on_new_value() {
        let mut clock = SimulationClock::new(100);
        assert!(clock.set_time(5));
        assert!(!clock.set_time(5));
        assert!(clock.set_time(6));
        assert_eq!(clock.get_time(), 6);
    }
}
