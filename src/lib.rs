// Core modules
pub mod api;
pub mod assembler;
pub mod config;
pub mod dataset;
pub mod error;
pub mod forecaster;
pub mod logging;
pub mod model;
pub mod models;
pub mod panel;
pub mod server;
pub mod synthetic;
pub mod training;

// Re-export commonly used types
pub use api::BinanceClient;
pub use config::AppConfig;
pub use error::ForecastError;
pub use forecaster::{Forecaster, Prediction};
pub use models::*;
pub use panel::{CandleBatch, Panel, PanelBuilder};

// Error handling
pub type Result<T> = std::result::Result<T, ForecastError>;
