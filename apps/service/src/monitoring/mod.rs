/// Monitoring engine - probes endpoints and drives the periodic sweep
///
/// This module is responsible for:
/// - Probing one target with bounded timeouts and classifying the result
/// - Fanning a sweep out over every registered endpoint
/// - Triggering sweeps on a fixed cadence
pub mod prober;
pub mod scheduler;
pub mod sweep;
pub mod types;

pub use prober::{HttpProber, ProbeError, Prober, build_http_client, normalize_target};
pub use scheduler::SweepScheduler;
pub use sweep::{SweepCoordinator, SweepReport, SweepSettings};
pub use types::{Outcome, ProbeOutcome};
