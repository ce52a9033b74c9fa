use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use bytes::BytesMut;
use tracing::{debug, info};

use common::wire::Wire;
use common::{LinkError, Sample};

/// Fire-and-forget sender for the telemetry stream.
///
/// The socket is non-blocking: a sample that cannot leave immediately is
/// dropped and counted, never retried.
#[derive(Debug)]
pub struct TelemetrySender {
    socket: UdpSocket,
    target: SocketAddr,
    scratch: BytesMut,
    sent: u64,
    dropped: u64,
}

impl TelemetrySender {
    pub fn bind(bind_addr: &str, target: &str) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "telemetry target resolved to nothing"))?;
        info!("Opened telemetry socket on {} streaming to {}", socket.local_addr()?, target);
        Ok(Self {
            socket,
            target,
            scratch: BytesMut::with_capacity(256),
            sent: 0,
            dropped: 0,
        })
    }

    pub fn send(&mut self, sample: &Sample) {
        self.scratch.clear();
        sample.encode(&mut self.scratch);
        match self.socket.send_to(&self.scratch, self.target) {
            Ok(_) => self.sent += 1,
            Err(err) => {
                self.dropped += 1;
                debug!(tick = sample.tick, "telemetry sample dropped: {err}");
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::wire::decode;
    use std::time::Duration;

    #[test]
    fn samples_arrive_as_single_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let mut sender = TelemetrySender::bind("127.0.0.1:0", &target).unwrap();

        let sample = Sample {
            tick: 3,
            time: 0.003,
            enable: true,
            ..Sample::default()
        };
        sender.send(&sample);
        assert_eq!(sender.sent(), 1);

        let mut buf = [0u8; 2048];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(decode::<Sample>(buf[..len].to_vec()).unwrap(), sample);
    }
}
