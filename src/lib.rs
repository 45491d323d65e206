pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod importer;
pub mod portal;
pub mod sensor;
pub mod setup;
pub mod store;
pub mod sync;
pub mod telemetry;
