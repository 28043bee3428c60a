/// What the coordinator should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Launch one additional worker.
    Grow,
    /// Launch a worker in place of one that exited.
    Replace,
    Hold,
}

/// Pool sizing state, free of any process handling.
///
/// Grows by one worker per tick when the tick saw more than `threshold`
/// requests and the pool is below `limit`. Never shrinks.
#[derive(Debug)]
pub struct Scaler {
    size: usize,
    limit: usize,
    threshold: u64,
    observed: u64,
    draining: bool,
}

impl Scaler {
    pub fn new(initial: usize, limit: usize, threshold: u64) -> Self {
        let limit = limit.max(1);
        Self {
            size: initial.clamp(1, limit),
            limit,
            threshold,
            observed: 0,
            draining: false,
        }
    }

    /// Workers to launch at startup.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn on_request(&mut self) {
        self.observed += 1;
    }

    /// Sample and reset the request count.
    pub fn on_tick(&mut self) -> Decision {
        let observed = std::mem::take(&mut self.observed);
        if self.draining || observed <= self.threshold || self.size >= self.limit {
            return Decision::Hold;
        }

        self.size += 1;
        Decision::Grow
    }

    pub fn on_exit(&mut self) -> Decision {
        if self.draining {
            self.size = self.size.saturating_sub(1);
            Decision::Hold
        } else {
            Decision::Replace
        }
    }

    /// A launch that never produced a worker frees its slot.
    pub fn on_launch_failed(&mut self) {
        self.size = self.size.saturating_sub(1);
    }

    /// Stop growing and stop replacing; exits now only shrink the pool.
    pub fn drain(&mut self) {
        self.draining = true;
    }

    pub fn is_drained(&self) -> bool {
        self.draining && self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_interval_grows_by_one_and_quiet_interval_keeps_size() {
        let mut scaler = Scaler::new(4, 8, 10);
        assert_eq!(scaler.size(), 4);

        for _ in 0..15 {
            scaler.on_request();
        }
        assert_eq!(scaler.on_tick(), Decision::Grow);
        assert_eq!(scaler.size(), 5);

        assert_eq!(scaler.on_tick(), Decision::Hold);
        assert_eq!(scaler.size(), 5);
    }

    #[test]
    fn threshold_is_strictly_greater() {
        let mut scaler = Scaler::new(2, 4, 10);
        for _ in 0..10 {
            scaler.on_request();
        }
        assert_eq!(scaler.on_tick(), Decision::Hold);
    }

    #[test]
    fn count_resets_every_tick() {
        let mut scaler = Scaler::new(1, 4, 10);
        for _ in 0..8 {
            scaler.on_request();
        }
        scaler.on_tick();
        for _ in 0..8 {
            scaler.on_request();
        }
        assert_eq!(scaler.on_tick(), Decision::Hold);
        assert_eq!(scaler.observed(), 0);
    }

    #[test]
    fn never_exceeds_limit() {
        let mut scaler = Scaler::new(3, 3, 0);
        scaler.on_request();
        assert_eq!(scaler.on_tick(), Decision::Hold);
        assert_eq!(scaler.size(), 3);
        // Counter still resets at the ceiling.
        assert_eq!(scaler.observed(), 0);
    }

    #[test]
    fn initial_size_is_clamped() {
        assert_eq!(Scaler::new(10, 4, 10).size(), 4);
        assert_eq!(Scaler::new(0, 4, 10).size(), 1);
    }

    #[test]
    fn exits_are_replaced_until_draining() {
        let mut scaler = Scaler::new(2, 2, 10);
        assert_eq!(scaler.on_exit(), Decision::Replace);
        assert_eq!(scaler.size(), 2);

        scaler.drain();
        scaler.on_request();
        scaler.on_request();
        assert_eq!(scaler.on_exit(), Decision::Hold);
        assert!(!scaler.is_drained());
        assert_eq!(scaler.on_exit(), Decision::Hold);
        assert!(scaler.is_drained());
    }
}
