pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;

pub use config::HarvesterConfig;
pub use error::{ErrorKind, HarvestError, Result};
pub use pipeline::delivery::DeliveryTracker;
pub use pipeline::ingestion::harvester::{HarvestRun, HarvestTotals};
pub use pipeline::processing::scheduler::ConversionManager;
pub use pipeline::sink::{OutputFormat, OutputSink};
pub use report::ErrorLogger;
