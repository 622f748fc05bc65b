pub mod adapters;
pub mod commands;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod logging;
pub mod ports;
