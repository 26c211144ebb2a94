pub mod aggregate;
pub mod config;
pub mod error;
pub mod http;
pub mod ignore;
pub mod matcher;
pub mod model;
pub mod output;
pub mod retry;
pub mod severity;
pub mod source;

pub use aggregate::Aggregator;
pub use config::Config;
pub use model::{Advisory, Level, Package, ScanResult};
pub use source::Source;
