//! Field-ordered binary encoding shared by the command and telemetry channels.
//!
//! Scalars are written big-endian in declaration order, strings as a `u32`
//! byte length followed by UTF-8, and lists as a count followed by that many
//! entries. Messages carry no field names or type tags of their own; both ends
//! agree on layout.
//!
//! On the command stream every message is wrapped in a frame: a `u32` payload
//! length followed by the payload. Telemetry datagrams hold one bare `Sample`.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, LinkError};
use crate::{Command, LogRecord, Mode, PingResponse, PlotPoint, Sample, Severity, Status, MAX_PLOTS};

/// Largest frame accepted on the command stream.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Largest telemetry datagram a receiver needs to accommodate.
pub const MAX_DATAGRAM_LEN: usize = 2048;

/// Encoded size of a [`Status`].
pub const STATUS_LEN: usize = 26;

/// Bytes of a ping response left for log records once the status and the
/// record count are written.
pub const PING_LOG_BUDGET: usize = MAX_FRAME_LEN - STATUS_LEN - 4;

/// Encoded size of one log record: severity, string length, message.
pub fn log_record_len(record: &LogRecord) -> usize {
    8 + record.message.len()
}

pub trait Wire: Sized {
    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError>;
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn get_i32(buf: &mut Bytes) -> Result<i32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

fn get_u32(buf: &mut Bytes) -> Result<u32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_f64(buf: &mut Bytes) -> Result<f64, DecodeError> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

fn get_bool(buf: &mut Bytes) -> Result<bool, DecodeError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8() != 0)
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String, DecodeError> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

impl Wire for Status {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.running as u8);
        buf.put_u8(self.enabled as u8);
        buf.put_i32(self.mode.as_i32());
        buf.put_f64(self.frequency);
        buf.put_i32(self.misses);
        buf.put_f64(self.wait_ratio);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Status {
            running: get_bool(buf)?,
            enabled: get_bool(buf)?,
            mode: Mode::from_i32(get_i32(buf)?)?,
            frequency: get_f64(buf)?,
            misses: get_i32(buf)?,
            wait_ratio: get_f64(buf)?,
        })
    }
}

impl Wire for PlotPoint {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.label);
        buf.put_f64(self.value);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(PlotPoint {
            label: get_string(buf)?,
            value: get_f64(buf)?,
        })
    }
}

impl Wire for Sample {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.tick);
        buf.put_f64(self.time);
        buf.put_f64(self.sense);
        buf.put_f64(self.command);
        buf.put_f64(self.midori);
        buf.put_i32(self.encoder);
        buf.put_u8(self.enable as u8);
        buf.put_i32(self.plots.len() as i32);
        for plot in &self.plots {
            plot.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let tick = get_i32(buf)?;
        let time = get_f64(buf)?;
        let sense = get_f64(buf)?;
        let command = get_f64(buf)?;
        let midori = get_f64(buf)?;
        let encoder = get_i32(buf)?;
        let enable = get_bool(buf)?;
        let count = get_i32(buf)?;
        if count < 0 || count as usize > MAX_PLOTS {
            return Err(DecodeError::TooManyPlots(count));
        }
        let mut plots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            plots.push(PlotPoint::decode(buf)?);
        }
        Ok(Sample {
            tick,
            time,
            sense,
            command,
            midori,
            encoder,
            enable,
            plots,
        })
    }
}

impl Wire for LogRecord {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.severity.as_i32());
        put_string(buf, &self.message);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(LogRecord {
            severity: Severity::from_i32(get_i32(buf)?)?,
            message: get_string(buf)?,
        })
    }
}

impl Wire for Command {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.tag());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Command::from_tag(get_i32(buf)?)
    }
}

impl Wire for PingResponse {
    fn encode(&self, buf: &mut BytesMut) {
        self.status.encode(buf);
        buf.put_u32(self.logs.len() as u32);
        for record in &self.logs {
            record.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let status = Status::decode(buf)?;
        let count = get_u32(buf)? as usize;
        // every record is at least a severity and an empty string
        ensure(buf, count.saturating_mul(8))?;
        let mut logs = Vec::with_capacity(count);
        for _ in 0..count {
            logs.push(LogRecord::decode(buf)?);
        }
        Ok(PingResponse { status, logs })
    }
}

pub fn encode<T: Wire>(message: &T) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    message.encode(&mut buf);
    buf.freeze()
}

/// Decodes exactly one message, rejecting leftover bytes.
pub fn decode<T: Wire>(payload: impl Into<Bytes>) -> Result<T, DecodeError> {
    let mut buf = payload.into();
    let message = T::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }
    Ok(message)
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), LinkError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(LinkError::FrameTooLarge(payload.len()));
    }
    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    writer.write_all(&frame).map_err(LinkError::from_transport)?;
    writer.flush().map_err(LinkError::from_transport)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Bytes, LinkError> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .map_err(LinkError::from_transport)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(LinkError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(LinkError::from_transport)?;
    Ok(Bytes::from(payload))
}

pub fn send_message<W: Write, T: Wire>(writer: &mut W, message: &T) -> Result<(), LinkError> {
    write_frame(writer, &encode(message))
}

pub fn receive_message<R: Read, T: Wire>(reader: &mut R) -> Result<T, LinkError> {
    let payload = read_frame(reader)?;
    Ok(decode(payload)?)
}
