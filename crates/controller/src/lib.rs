pub mod control_loop;
pub mod hardware;
pub mod law;
pub mod pid;
pub mod rate;
pub mod server;
pub mod shared;
pub mod telemetry;
pub mod timer;

use tracing::info;

use common::{LinkConfig, LinkError, LogSink};

pub use control_loop::{ControlLoop, LoopReport};
pub use hardware::{Hardware, SimulatedPendulum};
pub use law::{ControlLaw, PidLaw, Plots};
pub use rate::RateMonitor;
pub use server::{CommandServer, ServerState, SessionEnd, SessionOutcome};
pub use shared::SharedStatus;
pub use timer::LoopTimer;

/// Runs the controller against the simulated pendulum.
///
/// Serves one session, or keeps serving new sessions when
/// `controller.persistent` is set, until a terminate request arrives.
pub fn run_controller(config: &LinkConfig, shared: SharedStatus, sink: LogSink) -> Result<(), LinkError> {
    let mut server = CommandServer::bind(&config.controller, shared.clone(), sink)?;
    loop {
        let plant = SimulatedPendulum::new(config.controller.period());
        let law = PidLaw::new(&config.control);
        let outcome = server.serve_session(plant, law)?;
        info!(
            end = ?outcome.end,
            ticks = outcome.report.ticks,
            misses = outcome.report.misses,
            sent = outcome.report.samples_sent,
            dropped = outcome.report.samples_dropped,
            "Session finished"
        );
        if !config.controller.persistent || shared.terminate_requested() {
            return Ok(());
        }
    }
}
