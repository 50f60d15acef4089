use thiserror::Error;
use url::Url;

use crate::{
    fetch::FetchOutcome,
    sensor::SensorReading,
    status::{StatusDocument, StatusError},
};

/// The four fields pushed to the logging service, one per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Field {
    #[default]
    Uptime,
    MemoryAvailable,
    CpuLastMinute,
    Temperature,
}

impl Field {
    pub fn number(self) -> u8 {
        match self {
            Self::Uptime => 1,
            Self::MemoryAvailable => 2,
            Self::CpuLastMinute => 3,
            Self::Temperature => 4,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Uptime => Self::MemoryAvailable,
            Self::MemoryAvailable => Self::CpuLastMinute,
            Self::CpuLastMinute => Self::Temperature,
            Self::Temperature => Self::Uptime,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uptime => "uptime",
            Self::MemoryAvailable => "memory_available",
            Self::CpuLastMinute => "cpu_last_minute",
            Self::Temperature => "temperature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: Field,
    pub value: String,
}

impl FieldUpdate {
    /// Appends `field<N>=<value>` to the query of `base_url`, keeping any
    /// parameters already there. The value is form-encoded.
    pub fn publish_url(&self, base_url: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(base_url)?;
        url.query_pairs_mut()
            .append_pair(&format!("field{}", self.field.number()), &self.value);
        Ok(url.into())
    }
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("status fetch failed")]
    FetchFailed,
    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Owns the rotation cursor. The cursor only moves when a tick produced an
/// update, so a failed tick retries the same field next time.
#[derive(Debug, Clone, Default)]
pub struct FieldPublisher {
    cursor: Field,
    published: u64,
    skipped: u64,
}

impl FieldPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(cursor: Field) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }

    pub fn cursor(&self) -> Field {
        self.cursor
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Turns a fetched status document into the update for the current
    /// cursor and advances the cursor. The sensor is only read when the
    /// cursor selects the temperature field.
    pub fn on_status(
        &mut self,
        fetch: &FetchOutcome,
        read_sensor: impl FnOnce() -> SensorReading,
    ) -> Result<FieldUpdate, TickError> {
        let update = match self.build_update(fetch, read_sensor) {
            Ok(update) => update,
            Err(err) => {
                self.skipped = self.skipped.saturating_add(1);
                return Err(err);
            }
        };

        self.cursor = self.cursor.next();
        self.published = self.published.saturating_add(1);
        Ok(update)
    }

    fn build_update(
        &self,
        fetch: &FetchOutcome,
        read_sensor: impl FnOnce() -> SensorReading,
    ) -> Result<FieldUpdate, TickError> {
        let body = fetch.body().ok_or(TickError::FetchFailed)?;
        let doc = StatusDocument::parse(body)?;

        let value = match self.cursor {
            Field::Uptime => doc.uptime_seconds()?.to_string(),
            Field::MemoryAvailable => doc.memory_available(),
            Field::CpuLastMinute => doc.cpu_last_minute(),
            Field::Temperature => read_sensor().temperature_field(),
        };

        Ok(FieldUpdate {
            field: self.cursor,
            value,
        })
    }
}
