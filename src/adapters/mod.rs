//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod file_position_store;
pub mod indicator_signals;
pub mod json_signal_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
