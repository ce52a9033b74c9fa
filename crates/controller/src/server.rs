use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;

use tracing::{debug, error, info, warn};

use common::config::ControllerConfig;
use common::wire::{self, decode};
use common::{Command, LinkError, LogSink, PingResponse};

use crate::control_loop::{ControlLoop, LoopReport};
use crate::hardware::Hardware;
use crate::law::ControlLaw;
use crate::shared::SharedStatus;
use crate::telemetry::TelemetrySender;

/// Lifecycle of one command connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Connected,
    Serving,
    Disconnected,
    ShuttingDown,
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `Shutdown`.
    Shutdown,
    /// The client went away or the stream failed.
    Disconnected,
    /// A local terminate request stopped the control loop.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub report: LoopReport,
}

/// Accepts one command connection at a time and serves it while the control
/// thread runs.
pub struct CommandServer {
    listener: TcpListener,
    config: ControllerConfig,
    shared: SharedStatus,
    sink: LogSink,
    state: ServerState,
}

impl CommandServer {
    pub fn bind(config: &ControllerConfig, shared: SharedStatus, sink: LogSink) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(&config.command_addr)?;
        info!("Listening for commands on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config: config.clone(),
            shared,
            sink,
            state: ServerState::Idle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    fn transition(&mut self, next: ServerState) {
        debug!(from = ?self.state, to = ?next, "command server state change");
        self.state = next;
    }

    /// Runs one full connection lifecycle, from `Idle` to `Terminated`.
    ///
    /// Blocks until a client connects, starts the control thread, serves
    /// commands until shutdown or disconnect, then joins the control thread.
    pub fn serve_session<H, L>(&mut self, hardware: H, law: L) -> Result<SessionOutcome, LinkError>
    where
        H: Hardware + 'static,
        L: ControlLaw + 'static,
    {
        self.transition(ServerState::Idle);
        info!("Waiting for client to connect ...");
        let (mut stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("Failed to accept client: {err}");
                self.transition(ServerState::Terminated);
                return Err(err.into());
            }
        };
        self.transition(ServerState::Connected);
        info!("Connected to client {peer}");
        stream.set_nodelay(true)?;
        self.shared.begin_session();

        let telemetry = match TelemetrySender::bind(&self.config.telemetry_bind, &self.config.telemetry_target) {
            Ok(telemetry) => telemetry,
            Err(err) => {
                error!("Failed to open telemetry socket: {err}");
                let _ = stream.shutdown(Shutdown::Both);
                self.transition(ServerState::Terminated);
                return Err(err);
            }
        };

        // lets the control thread unblock our read when it stops on its own
        let wake = stream.try_clone()?;
        let control = ControlLoop::new(&self.config, hardware, law, self.shared.clone(), telemetry);
        let handle = thread::Builder::new()
            .name("control".to_string())
            .spawn(move || {
                let report = control.run();
                let _ = wake.shutdown(Shutdown::Both);
                report
            })?;

        self.transition(ServerState::Serving);
        let end = self.serve(&mut stream);

        let report = match handle.join() {
            Ok(report) => report,
            Err(_) => {
                error!("Control thread panicked.");
                LoopReport::default()
            }
        };
        let _ = stream.shutdown(Shutdown::Both);
        self.transition(ServerState::Terminated);
        Ok(SessionOutcome { end, report })
    }

    fn serve(&mut self, stream: &mut TcpStream) -> SessionEnd {
        loop {
            let payload = match wire::read_frame(stream) {
                Ok(payload) => payload,
                Err(err) => return self.lost_connection(err),
            };
            let command = match decode::<Command>(payload) {
                Ok(command) => command,
                Err(err) => {
                    warn!("Ignoring malformed command: {err}");
                    continue;
                }
            };
            match command {
                Command::Ping => {
                    // records past the frame budget wait for the next ping
                    let response = PingResponse {
                        status: self.shared.snapshot(),
                        logs: self.sink.drain_within(wire::PING_LOG_BUDGET),
                    };
                    if let Err(err) = wire::send_message(stream, &response) {
                        return self.lost_connection(err);
                    }
                }
                Command::Enable => {
                    self.shared.set_enabled(true);
                    info!("Enabling pendulum.");
                }
                Command::Disable => {
                    self.shared.set_enabled(false);
                    info!("Disabling pendulum.");
                }
                Command::ToggleMode => {
                    let mode = self.shared.toggle_mode();
                    info!("Changing feedback mode to {mode}.");
                }
                Command::ZeroReference => {
                    self.shared.request_zero();
                    info!("Zeroing position reference.");
                }
                Command::Shutdown => {
                    info!("Shutting down controller.");
                    self.transition(ServerState::ShuttingDown);
                    self.shared.request_stop();
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    fn lost_connection(&mut self, err: LinkError) -> SessionEnd {
        self.transition(ServerState::Disconnected);
        if self.shared.terminate_requested() {
            info!("Control loop terminated locally; closing session.");
            return SessionEnd::Terminated;
        }
        match err {
            LinkError::Disconnected => info!("Client disconnected."),
            other => error!("Command channel failed: {other}"),
        }
        self.shared.request_stop();
        SessionEnd::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedPendulum;
    use crate::law::PidLaw;
    use common::config::ControlConfig;
    use common::wire::{receive_message, send_message};
    use std::io::Write;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn setup() -> (CommandServer, SharedStatus, UdpSocket) {
        setup_with_sink(LogSink::new(16))
    }

    fn setup_with_sink(sink: LogSink) -> (CommandServer, SharedStatus, UdpSocket) {
        let telemetry = UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ControllerConfig {
            command_addr: "127.0.0.1:0".to_string(),
            telemetry_bind: "127.0.0.1:0".to_string(),
            telemetry_target: telemetry.local_addr().unwrap().to_string(),
            loop_rate_hz: 500.0,
            ..ControllerConfig::default()
        };
        let shared = SharedStatus::new();
        let server = CommandServer::bind(&config, shared.clone(), sink).unwrap();
        (server, shared, telemetry)
    }

    fn run(mut server: CommandServer) -> thread::JoinHandle<(SessionOutcome, ServerState)> {
        thread::spawn(move || {
            let plant = SimulatedPendulum::new(Duration::from_millis(2));
            let outcome = server
                .serve_session(plant, PidLaw::new(&ControlConfig::default()))
                .unwrap();
            (outcome, server.state())
        })
    }

    fn ping(stream: &mut TcpStream) -> PingResponse {
        send_message(stream, &Command::Ping).unwrap();
        receive_message(stream).unwrap()
    }

    #[test]
    fn commands_are_applied_in_order() {
        let (server, shared, _telemetry) = setup();
        let addr = server.local_addr().unwrap();
        assert_eq!(server.state(), ServerState::Idle);
        let handle = run(server);

        let mut stream = TcpStream::connect(addr).unwrap();
        send_message(&mut stream, &Command::Enable).unwrap();
        assert!(ping(&mut stream).status.enabled);

        send_message(&mut stream, &Command::Disable).unwrap();
        send_message(&mut stream, &Command::ToggleMode).unwrap();
        let response = ping(&mut stream);
        assert!(!response.status.enabled);
        assert_eq!(response.status.mode, common::Mode::Midori);

        send_message(&mut stream, &Command::Shutdown).unwrap();
        let (outcome, state) = handle.join().unwrap();
        assert_eq!(outcome.end, SessionEnd::Shutdown);
        assert_eq!(state, ServerState::Terminated);
        assert!(outcome.report.ticks > 0);
        assert!(!shared.snapshot().running);
    }

    #[test]
    fn malformed_command_keeps_the_connection() {
        let (server, _shared, _telemetry) = setup();
        let addr = server.local_addr().unwrap();
        let handle = run(server);

        let mut stream = TcpStream::connect(addr).unwrap();
        wire::write_frame(&mut stream, &42i32.to_be_bytes()).unwrap();
        wire::write_frame(&mut stream, &[1u8]).unwrap();
        let response = ping(&mut stream);
        assert!(!response.status.enabled);

        send_message(&mut stream, &Command::Shutdown).unwrap();
        assert_eq!(handle.join().unwrap().0.end, SessionEnd::Shutdown);
    }

    #[test]
    fn abrupt_disconnect_stops_the_loop() {
        let (server, shared, telemetry) = setup();
        telemetry
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = run(server);

        let mut stream = TcpStream::connect(addr).unwrap();
        send_message(&mut stream, &Command::Enable).unwrap();
        thread::sleep(Duration::from_millis(50));
        // half a frame, then gone
        stream.write_all(&[0, 0]).unwrap();
        drop(stream);

        let (outcome, state) = handle.join().unwrap();
        assert_eq!(outcome.end, SessionEnd::Disconnected);
        assert_eq!(state, ServerState::Terminated);
        assert!(shared.stop_requested());

        let mut buf = [0u8; 2048];
        let mut last_tick = None;
        while let Ok(len) = telemetry.recv(&mut buf) {
            let sample: common::Sample = decode(buf[..len].to_vec()).unwrap();
            last_tick = Some(sample.tick);
            if sample.is_sentinel() {
                break;
            }
        }
        assert_eq!(last_tick, Some(common::SENTINEL_TICK));
    }

    #[test]
    fn local_terminate_unblocks_the_command_thread() {
        let (server, shared, _telemetry) = setup();
        let addr = server.local_addr().unwrap();
        let handle = run(server);

        let mut stream = TcpStream::connect(addr).unwrap();
        let _ = ping(&mut stream);
        shared.request_terminate();

        let (outcome, _) = handle.join().unwrap();
        assert_eq!(outcome.end, SessionEnd::Terminated);
    }

    #[test]
    fn ping_drains_the_log_sink() {
        let (server, _shared, _telemetry) = setup();
        let sink = server.sink.clone();
        let addr = server.local_addr().unwrap();
        let handle = run(server);

        let mut stream = TcpStream::connect(addr).unwrap();
        sink.push(common::LogRecord::new(common::Severity::Warning, "first"));
        sink.push(common::LogRecord::new(common::Severity::Info, "second"));
        let response = ping(&mut stream);
        let messages: Vec<_> = response.logs.iter().map(|r| r.message.as_str()).collect();
        assert!(messages.ends_with(&["first", "second"]));
        assert!(ping(&mut stream).logs.iter().all(|r| r.message != "first"));

        send_message(&mut stream, &Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn oversized_log_backlog_spans_several_pings() {
        let sink = LogSink::new(1000);
        for i in 0..1000 {
            sink.push(common::LogRecord::new(
                common::Severity::Debug,
                format!("{i:04} {}", "x".repeat(75)),
            ));
        }
        let (server, _shared, _telemetry) = setup_with_sink(sink.clone());
        let addr = server.local_addr().unwrap();
        let handle = run(server);

        let mut stream = TcpStream::connect(addr).unwrap();
        let first = ping(&mut stream).logs;
        assert!(!first.is_empty());
        assert!(first.len() < 1000);
        assert!(first.iter().map(wire::log_record_len).sum::<usize>() <= wire::PING_LOG_BUDGET);

        let second = ping(&mut stream).logs;
        assert_eq!(first.len() + second.len(), 1000);
        assert!(first[0].message.starts_with("0000"));
        assert!(second[0].message.starts_with(&format!("{:04}", first.len())));

        send_message(&mut stream, &Command::Shutdown).unwrap();
        assert_eq!(handle.join().unwrap().0.end, SessionEnd::Shutdown);
    }
}
