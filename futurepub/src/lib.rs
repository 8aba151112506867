// Delayed publishing on top of an AMQP broker: messages are held in a TTL
// queue and dead-lettered back to the scheduler until they are due.

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error_queue;
pub mod errors;
pub mod naming;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod submit;
pub mod telemetry;
pub mod topology;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::DelayedEnvelope;
pub use scheduler::{Evaluation, SchedulerService};
pub use submit::{FuturePublisher, Submission};
pub use topology::TopologyManager;
