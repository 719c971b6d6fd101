//! Configuration types and loading for the delivery workspace.

pub mod environment;
pub mod load;
pub mod shared;

pub use environment::{Environment, EnvironmentError};
pub use load::{Config, LoadConfigError, load_config, load_config_from};
