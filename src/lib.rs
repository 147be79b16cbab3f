pub mod clockify;
pub mod commands;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod oura;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod token_store;

#[cfg(test)]
mod test_utils;
