pub mod detector;
pub mod errors;
pub mod models;

pub use self::detector::parse_source;
pub use self::errors::SourceError;
pub use self::models::{InitialMetadata, Platform, SourceInput, SourceSpec};
