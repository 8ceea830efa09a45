//! Process-wide tracing setup shared by the PingTower binaries.

mod subscriber;

pub use crate::subscriber::{init as init_tracing, init_with_level};
