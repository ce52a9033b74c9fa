use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{info, warn};

use common::config::ClientConfig;
use common::{Command, LinkError, LogRecord, Sample, Status};

use crate::command::CommandClient;
use crate::history::RollingBuffers;
use crate::receiver::TelemetryReceiver;
use crate::spsc::{self, Consumer};
use crate::stats::{LinkStats, StatsSnapshot};

/// Client state driven by a host application's update cycle.
///
/// Owns the command channel, the telemetry thread and everything received.
/// The host calls [`ClientSession::update`] once per frame.
pub struct ClientSession {
    config: ClientConfig,
    command: CommandClient,
    receiver: Option<TelemetryReceiver>,
    queue: Option<Consumer<Sample>>,
    stats: Arc<LinkStats>,
    history: RollingBuffers,
    remote_logs: VecDeque<LogRecord>,
    status: Status,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            command: CommandClient::new(&config),
            receiver: None,
            queue: None,
            stats: Arc::new(LinkStats::default()),
            history: RollingBuffers::new(config.history_capacity),
            remote_logs: VecDeque::with_capacity(config.remote_log_capacity),
            status: Status::default(),
            config,
        }
    }

    /// Opens a fresh session: binds telemetry, connects the command channel,
    /// clears history and counters, then starts the receiver thread.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        self.disconnect();
        let socket = TelemetryReceiver::bind(&self.config)?;
        self.command.connect()?;

        self.history.clear();
        self.stats.reset();
        self.status = Status::default();

        let (producer, consumer) = spsc::channel(self.config.queue_capacity);
        match TelemetryReceiver::spawn(
            socket,
            producer,
            Arc::clone(&self.stats),
            self.command.connected_flag(),
        ) {
            Ok(receiver) => {
                self.receiver = Some(receiver);
                self.queue = Some(consumer);
                Ok(())
            }
            Err(err) => {
                warn!("Failed to start telemetry receiver: {err}");
                self.command.disconnect();
                Err(err)
            }
        }
    }

    /// One host cycle: ping the controller, then move queued telemetry into
    /// history. The queue is drained even after the link dropped.
    pub fn update(&mut self) {
        if self.command.is_connected() {
            match self.command.ping() {
                Ok(response) => {
                    self.stats.record_sent();
                    self.status = response.status;
                    for record in response.logs {
                        self.push_log(record);
                    }
                }
                Err(err) => {
                    info!("Controller link down: {err}");
                    self.status.running = false;
                }
            }
        }
        self.drain_queue();
    }

    pub fn send(&mut self, command: Command) -> Result<(), LinkError> {
        self.command.send(command)?;
        self.stats.record_sent();
        if command == Command::Shutdown {
            self.status = Status::default();
        }
        Ok(())
    }

    /// Moves everything queued into history. Returns the number of samples
    /// taken off the queue.
    pub fn drain_queue(&mut self) -> usize {
        let Some(queue) = &self.queue else {
            return 0;
        };
        let history = &mut self.history;
        queue.drain_with(|sample| {
            history.push(&sample);
        })
    }

    pub fn disconnect(&mut self) {
        self.command.disconnect();
        if let Some(mut receiver) = self.receiver.take() {
            receiver.join();
        }
        self.drain_queue();
        self.queue = None;
    }

    pub fn is_connected(&self) -> bool {
        self.command.is_connected()
    }

    /// True while the telemetry thread is still receiving.
    pub fn is_streaming(&self) -> bool {
        self.receiver.as_ref().is_some_and(TelemetryReceiver::is_running)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn history(&self) -> &RollingBuffers {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut RollingBuffers {
        &mut self.history
    }

    pub fn remote_logs(&self) -> &VecDeque<LogRecord> {
        &self.remote_logs
    }

    pub fn clear_remote_logs(&mut self) {
        self.remote_logs.clear();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn push_log(&mut self, record: LogRecord) {
        if self.config.remote_log_capacity == 0 {
            return;
        }
        if self.remote_logs.len() == self.config.remote_log_capacity {
            self.remote_logs.pop_front();
        }
        self.remote_logs.push_back(record);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Severity;

    #[test]
    fn unconnected_session_is_inert() {
        let mut session = ClientSession::new(ClientConfig::default());
        assert!(!session.is_connected());
        assert!(!session.is_streaming());
        session.update();
        assert_eq!(session.drain_queue(), 0);
        assert!(matches!(session.send(Command::Enable), Err(LinkError::NotConnected)));
        assert_eq!(session.stats().messages_sent, 0);
    }

    #[test]
    fn remote_logs_keep_the_most_recent() {
        let config = ClientConfig {
            remote_log_capacity: 2,
            ..ClientConfig::default()
        };
        let mut session = ClientSession::new(config);
        for message in ["a", "b", "c"] {
            session.push_log(LogRecord::new(Severity::Info, message));
        }
        let kept: Vec<_> = session.remote_logs().iter().map(|r| r.message.as_str()).collect();
        assert_eq!(kept, vec!["b", "c"]);
        session.clear_remote_logs();
        assert!(session.remote_logs().is_empty());
    }
}
