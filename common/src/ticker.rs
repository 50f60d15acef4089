/// Fires once per interval of monotonic time, however often it is polled.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval_ms: u64,
    last_fire_ms: Option<u64>,
}

impl TickScheduler {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            last_fire_ms: None,
        }
    }

    /// The first poll fires. After a stall spanning several intervals this
    /// fires once and re-anchors on the latest interval boundary.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        let Some(last_fire_ms) = self.last_fire_ms else {
            self.last_fire_ms = Some(now_ms);
            return true;
        };

        let elapsed = now_ms.saturating_sub(last_fire_ms);
        if elapsed < self.interval_ms {
            return false;
        }

        let whole_intervals = elapsed / self.interval_ms;
        self.last_fire_ms = Some(last_fire_ms + whole_intervals * self.interval_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval_with_fast_loop() {
        let mut ticker = TickScheduler::new(15_000);
        let mut fired = Vec::new();

        for now_ms in (0..60_000).step_by(200) {
            if ticker.poll(now_ms) {
                fired.push(now_ms);
            }
        }

        assert_eq!(fired, vec![0, 15_000, 30_000, 45_000]);
    }

    #[test]
    fn slow_loop_does_not_drift() {
        let mut ticker = TickScheduler::new(15_000);
        let mut fired = Vec::new();

        for now_ms in (0..61_000).step_by(7_000) {
            if ticker.poll(now_ms) {
                fired.push(now_ms);
            }
        }

        // boundaries at 15s, 30s, 45s are first observed at 21s, 35s, 49s
        assert_eq!(fired, vec![0, 21_000, 35_000, 49_000]);
    }

    #[test]
    fn stall_fires_once_then_realigns() {
        let mut ticker = TickScheduler::new(15_000);
        assert!(ticker.poll(1_000));

        assert!(ticker.poll(70_000));
        assert!(!ticker.poll(70_500));
        assert!(!ticker.poll(75_999));
        assert!(ticker.poll(76_000));
    }
}
