use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::LinkError;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub controller: ControllerConfig,
    pub client: ClientConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub loop_rate_hz: f64,
    pub command_addr: String,
    pub telemetry_bind: String,
    pub telemetry_target: String,
    pub log_capacity: usize,
    pub rate_interval_ms: u64,
    pub log_level: String,
    /// Return to accepting after a session ends instead of exiting.
    pub persistent: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loop_rate_hz: 1000.0,
            command_addr: "0.0.0.0:55001".to_string(),
            telemetry_bind: "0.0.0.0:55002".to_string(),
            telemetry_target: "127.0.0.1:55003".to_string(),
            log_capacity: 100,
            rate_interval_ms: 1000,
            log_level: "debug".to_string(),
            persistent: false,
        }
    }
}

impl ControllerConfig {
    /// Loop period rounded to whole nanoseconds.
    pub fn period(&self) -> Duration {
        Duration::from_nanos((1e9 / self.loop_rate_hz).round() as u64)
    }

    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub command_addr: String,
    pub telemetry_bind: String,
    pub connect_timeout_ms: u64,
    pub ping_timeout_ms: u64,
    pub queue_capacity: usize,
    pub history_capacity: usize,
    pub remote_log_capacity: usize,
    /// Receive timeout of the telemetry socket, bounds how long the receiver
    /// takes to notice a dropped connection.
    pub receive_poll_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_addr: "127.0.0.1:55001".to_string(),
            telemetry_bind: "0.0.0.0:55003".to_string(),
            connect_timeout_ms: 100,
            ping_timeout_ms: 1000,
            queue_capacity: 2000,
            history_capacity: 20_000,
            remote_log_capacity: 500,
            receive_poll_ms: 100,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.01,
        }
    }
}

/// Gains of the bundled demo control law.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub encoder: PidGains,
    pub midori: PidGains,
    /// Saturation of the amplifier command [V].
    pub command_limit: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            encoder: PidGains::default(),
            midori: PidGains::default(),
            command_limit: 10.0,
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<LinkConfig, LinkError> {
    let content = fs::read_to_string(path)?;
    let config: LinkConfig = toml::from_str(&content)?;
    Ok(config)
}

impl LinkConfig {
    /// Loads `path` when it exists, defaults otherwise.
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        if path.exists() {
            load_config(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[controller]\nloop_rate_hz = 500.0\n\n[client]\nping_timeout_ms = 250\n\n[control.encoder]\nkp = 4.0"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.controller.loop_rate_hz, 500.0);
        assert_eq!(config.controller.period(), Duration::from_millis(2));
        assert_eq!(config.controller.log_capacity, 100);
        assert_eq!(config.client.ping_timeout(), Duration::from_millis(250));
        assert_eq!(config.client.queue_capacity, 2000);
        assert_eq!(config.control.encoder.kp, 4.0);
        assert_eq!(config.control.encoder.ki, 0.1);
        assert_eq!(config.control.midori, PidGains::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[controller]\nloop_rate_hz = \"fast\"").unwrap();
        assert!(matches!(load_config(file.path()), Err(LinkError::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkConfig::from_file_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LinkConfig::default());
        assert!(matches!(
            load_config(dir.path().join("absent.toml")),
            Err(LinkError::Io(_))
        ));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/link.toml");
        assert_eq!(load_config(path).unwrap(), LinkConfig::default());
    }
}
