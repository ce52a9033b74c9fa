pub mod command;
pub mod history;
pub mod receiver;
pub mod session;
pub mod spsc;
pub mod stats;

pub use command::CommandClient;
pub use history::{Channel, RollingBuffers};
pub use receiver::{GapDetector, ReceiverExit, TelemetryReceiver, TickVerdict};
pub use session::ClientSession;
pub use stats::{LinkStats, StatsSnapshot};
