pub mod config;
pub mod database;
pub mod events;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod validation;

#[cfg(test)]
mod testing;
