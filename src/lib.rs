pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod geo;
pub mod geolocate;
pub mod highlight;
pub mod location;
pub mod places;
pub mod search;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use error::{AppError, AppResult};
