use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use common::config::ClientConfig;
use common::wire::{receive_message, send_message};
use common::{Command, LinkError, PingResponse};

/// Reliable command channel to the controller.
///
/// Any send or receive failure drops the connection; every later call returns
/// [`LinkError::NotConnected`] until [`CommandClient::connect`] succeeds again.
pub struct CommandClient {
    addr: String,
    connect_timeout: Duration,
    ping_timeout: Duration,
    stream: Option<TcpStream>,
    connected: Arc<AtomicBool>,
}

impl CommandClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            addr: config.command_addr.clone(),
            connect_timeout: config.connect_timeout(),
            ping_timeout: config.ping_timeout(),
            stream: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connect(&mut self) -> Result<(), LinkError> {
        self.disconnect();
        let target = resolve(&self.addr)?;
        let stream = TcpStream::connect_timeout(&target, self.connect_timeout).map_err(|err| {
            warn!("Failed to connect to controller at {target}: {err}");
            LinkError::from_transport(err)
        })?;
        stream.set_read_timeout(Some(self.ping_timeout))?;
        stream.set_nodelay(true)?;
        info!("Connected to controller at {target}");
        self.stream = Some(stream);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Flag cleared whenever this client loses its connection. Shared with the
    /// telemetry receiver so it stops alongside the command channel.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn send(&mut self, command: Command) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        let result = send_message(stream, &command);
        self.check(result)
    }

    /// Round trip: sends `Ping` and waits up to the ping timeout for the
    /// status and pending controller logs.
    pub fn ping(&mut self) -> Result<PingResponse, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        let result = send_message(stream, &Command::Ping).and_then(|()| receive_message(stream));
        self.check(result)
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::Release);
    }

    fn check<T>(&mut self, result: Result<T, LinkError>) -> Result<T, LinkError> {
        if let Err(err) = &result {
            warn!("Lost connection to controller: {err}");
            self.disconnect();
        }
        result
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn resolve(addr: &str) -> Result<SocketAddr, LinkError> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        LinkError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{addr} resolved to no address"),
        ))
    })
}
