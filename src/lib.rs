pub mod forge_config;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod persistence;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod store;
pub mod tracker;
pub mod ui;
