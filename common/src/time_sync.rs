use chrono::{DateTime, FixedOffset, TimeZone};

/// Bookkeeping for a periodic, non-blocking wall-clock sync.
#[derive(Debug, Clone)]
pub struct TimeSync {
    interval_ms: u64,
    last_sync_ms: Option<u64>,
    last_epoch: Option<i64>,
}

impl TimeSync {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_sync_ms: None,
            last_epoch: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.last_epoch.is_some()
    }

    fn is_due(&self, now_ms: u64) -> bool {
        match self.last_sync_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
            None => true,
        }
    }

    /// Runs `exchange` when a refresh is due and returns the new epoch seconds
    /// if it produced one. A miss leaves the schedule untouched so the next
    /// call tries again.
    pub fn refresh(&mut self, now_ms: u64, exchange: impl FnOnce() -> Option<i64>) -> Option<i64> {
        if !self.is_due(now_ms) {
            return None;
        }

        let epoch = exchange().filter(|epoch| *epoch > 0)?;
        self.last_sync_ms = Some(now_ms);
        self.last_epoch = Some(epoch);
        Some(epoch)
    }
}

pub fn local_time(epoch: i64, utc_offset_secs: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    offset.timestamp_opt(epoch, 0).single()
}

pub fn format_clock(epoch: i64, utc_offset_secs: i32) -> String {
    local_time(epoch, utc_offset_secs)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPOCH: i64 = 1_767_225_600; // 2026-01-01T00:00:00Z

    #[test]
    fn first_refresh_always_attempts() {
        let mut sync = TimeSync::new(60_000);
        assert!(!sync.is_synced());
        assert_eq!(sync.refresh(5, || Some(EPOCH)), Some(EPOCH));
        assert!(sync.is_synced());
    }

    #[test]
    fn skips_exchange_until_interval_elapses() {
        let mut sync = TimeSync::new(60_000);
        sync.refresh(0, || Some(EPOCH));

        assert_eq!(sync.refresh(59_999, || panic!("exchange before due")), None);
        assert_eq!(sync.refresh(60_000, || Some(EPOCH + 60)), Some(EPOCH + 60));
    }

    #[test]
    fn failed_exchange_retries_next_call() {
        let mut sync = TimeSync::new(60_000);
        assert_eq!(sync.refresh(0, || None), None);
        assert_eq!(sync.refresh(200, || Some(EPOCH)), Some(EPOCH));
    }

    #[test]
    fn formats_with_utc_offset() {
        assert_eq!(format_clock(EPOCH, -18_000), "19:00:00");
        assert_eq!(format_clock(EPOCH, 0), "00:00:00");
    }
}
