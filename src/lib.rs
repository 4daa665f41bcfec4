pub mod cli;
pub mod config;
pub mod fsutil;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod sources;
pub mod validate;

pub use cli::run;
pub use model::{ConnectionType, ServerRecord, SortField, sort_for_display};
pub use registry::{Registry, RegistryError};
