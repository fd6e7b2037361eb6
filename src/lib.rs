pub mod config;
pub mod csv;
pub mod drive;
pub mod logging;
pub mod mapper;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod source;

pub use config::{AppConfig, SourceConfig};
pub use matcher::matches;
pub use models::{RawRow, Record, TableRow};
pub use normalize::normalize;
pub use orchestrator::{SearchOrchestrator, SearchPhase, SearchState};
pub use source::{DataSource, DataSourceError, ParseError, build_source};
