use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid status document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("uptime of {days}d {hours}h {minutes}m does not fit in seconds")]
    UptimeOverflow { days: u64, hours: u64, minutes: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Uptime {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
}

impl Uptime {
    pub fn total_seconds(&self) -> Result<u64, StatusError> {
        self.days
            .checked_mul(24)
            .and_then(|hours| hours.checked_add(self.hours))
            .and_then(|hours| hours.checked_mul(60))
            .and_then(|minutes| minutes.checked_add(self.minutes))
            .and_then(|minutes| minutes.checked_mul(60))
            .ok_or(StatusError::UptimeOverflow {
                days: self.days,
                hours: self.hours,
                minutes: self.minutes,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Memory {
    pub available: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CpuLoading {
    pub last_minute: Value,
}

/// The subset of the remote status document the publisher reads. Unknown
/// fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusDocument {
    pub uptime: Uptime,
    pub memory: Memory,
    pub cpu_loading: CpuLoading,
}

impl StatusDocument {
    pub fn parse(body: &str) -> Result<Self, StatusError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn uptime_seconds(&self) -> Result<u64, StatusError> {
        self.uptime.total_seconds()
    }

    /// `memory.available` without its two-character unit suffix.
    pub fn memory_available(&self) -> String {
        strip_unit_suffix(&self.memory.available)
    }

    pub fn cpu_last_minute(&self) -> String {
        match &self.cpu_loading.last_minute {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

fn strip_unit_suffix(raw: &str) -> String {
    let keep = raw.chars().count().saturating_sub(2);
    raw.chars().take(keep).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "hostname": "csunix",
        "uptime": { "days": 2, "hours": 3, "minutes": 4 },
        "memory": { "total": "2048MB", "available": "512kB" },
        "cpu_loading": { "last_minute": 0.15, "last_five": 0.2 }
    }"#;

    #[test]
    fn parses_sample_document() {
        let doc = StatusDocument::parse(SAMPLE).unwrap();
        assert_eq!(
            doc.uptime,
            Uptime {
                days: 2,
                hours: 3,
                minutes: 4
            }
        );
        assert_eq!(doc.memory.available, "512kB");
    }

    #[test]
    fn uptime_formula() {
        let doc = StatusDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.uptime_seconds().unwrap(), 183_840);
    }

    #[test]
    fn oversized_uptime_is_an_error() {
        let raw = SAMPLE.replace("\"days\": 2", "\"days\": 800000000000000000");
        let doc = StatusDocument::parse(&raw).unwrap();

        let err = doc.uptime_seconds().unwrap_err();

        assert!(matches!(err, StatusError::UptimeOverflow { days: 800_000_000_000_000_000, .. }));
    }

    #[test]
    fn memory_drops_unit_suffix() {
        let doc = StatusDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.memory_available(), "512");
        assert_eq!(strip_unit_suffix("1024 MB"), "1024");
        assert_eq!(strip_unit_suffix("k"), "");
    }

    #[test]
    fn cpu_load_keeps_numbers_and_strings_verbatim() {
        let doc = StatusDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.cpu_last_minute(), "0.15");

        let raw = SAMPLE.replace("0.15", "\"1.05\"");
        let doc = StatusDocument::parse(&raw).unwrap();
        assert_eq!(doc.cpu_last_minute(), "1.05");
    }

    #[test]
    fn missing_section_is_rejected() {
        let err = StatusDocument::parse(r#"{ "uptime": { "days": 1, "hours": 0, "minutes": 0 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(StatusDocument::parse("Failed!").is_err());
    }
}
