/// Failure events and the durable log that carries them from the sweep to
/// the notification consumer.
pub mod log;
pub mod message;
pub mod publisher;

pub use log::{EventLog, LibsqlEventLog, LogPosition, LogRecord};
pub use message::{FailureEvent, MessageError, NotificationMessage};
pub use publisher::{LogPublisher, PublishError, Publisher};
