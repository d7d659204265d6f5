pub mod agents;
pub mod chat;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod model;
pub mod provider;
pub mod runner;
pub mod session;
pub mod streaming;
pub mod telemetry;
pub mod tools;
