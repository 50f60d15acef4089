pub mod config;
pub mod fetch;
pub mod rotation;
pub mod sensor;
pub mod snapshot;
pub mod static_files;
pub mod status;
pub mod ticker;
pub mod time_sync;
pub mod trust;

pub use config::{MonitorConfig, NetworkConfig, RuntimeConfig};
pub use fetch::FetchOutcome;
pub use rotation::{Field, FieldPublisher, FieldUpdate, TickError};
pub use sensor::SensorReading;
pub use snapshot::{build_snapshot, SnapshotError};
pub use static_files::ResolvedFile;
pub use status::{StatusDocument, StatusError};
pub use ticker::TickScheduler;
pub use time_sync::TimeSync;
pub use trust::{parse_pem_bundle, TrustStoreError};

pub const DATA_ENDPOINT: &str = "/getData";
