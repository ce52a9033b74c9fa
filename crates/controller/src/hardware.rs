//! Narrow interface to the I/O board plus a software pendulum standing in for it.

use std::f64::consts::PI;
use std::time::Duration;

use thiserror::Error;

/// Encoder resolution of the pendulum shaft.
pub const COUNTS_PER_REV: f64 = 500.0;

/// Number of indicator LEDs mirroring the enable state.
pub const LED_COUNT: usize = 4;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("transient read failure on {0}")]
    Glitch(&'static str),

    #[error("hardware session is not open")]
    NotOpen,
}

/// Inputs read from the board once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSample {
    /// Amplifier current sense [V].
    pub sense: f64,
    /// Midori potentiometer [V].
    pub midori: f64,
    /// Shaft encoder [counts].
    pub encoder: i32,
}

/// Outputs written to the board once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputCommand {
    /// Amplifier command [V].
    pub command: f64,
    /// Digital amplifier enable line.
    pub enable_line: bool,
    pub leds: [bool; LED_COUNT],
}

impl OutputCommand {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn actuated(command: f64, enabled: bool) -> Self {
        Self {
            command: if enabled { command } else { 0.0 },
            enable_line: enabled,
            leds: [enabled; LED_COUNT],
        }
    }
}

/// Board collaborator driven by the control thread.
pub trait Hardware: Send {
    fn read_inputs(&mut self) -> Result<InputSample, HardwareError>;

    fn write_outputs(&mut self, outputs: &OutputCommand) -> Result<(), HardwareError>;

    /// Re-baselines the position reference at its current value.
    fn zero_reference(&mut self);

    /// Clears a latched encoder fault, returning whether one was set.
    fn clear_faults(&mut self) -> bool {
        false
    }

    fn enable_actuation(&mut self);

    fn disable_actuation(&mut self);

    fn close(&mut self);
}

/// Damped pendulum driven by the amplifier command.
#[derive(Debug, Clone)]
pub struct SimulatedPendulum {
    dt: f64,
    theta: f64,
    omega: f64,
    zero_offset: f64,
    command: f64,
    actuating: bool,
    open: bool,
    reads: u64,
    glitch_every: Option<u64>,
    fault_latched: bool,
}

impl SimulatedPendulum {
    const GRAVITY_OVER_LENGTH: f64 = 9.81 / 0.3;
    const DAMPING: f64 = 0.8;
    /// Angular acceleration per volt of command.
    const TORQUE_GAIN: f64 = 4.0;
    const MIDORI_CENTER: f64 = 2.5;
    const MIDORI_VOLTS_PER_RAD: f64 = 1.0;
    /// Amplifier sense volts per command volt.
    const SENSE_GAIN: f64 = 0.1;

    pub fn new(period: Duration) -> Self {
        Self {
            dt: period.as_secs_f64(),
            theta: 0.0,
            omega: 0.0,
            zero_offset: 0.0,
            command: 0.0,
            actuating: false,
            open: true,
            reads: 0,
            glitch_every: None,
            fault_latched: false,
        }
    }

    /// Starts the pendulum displaced by `theta` radians.
    pub fn with_initial_angle(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    /// Makes every `n`th read fail transiently and latch an encoder fault.
    pub fn with_glitch_every(mut self, n: u64) -> Self {
        self.glitch_every = Some(n.max(1));
        self
    }

    fn step(&mut self) {
        let drive = if self.actuating {
            Self::TORQUE_GAIN * self.command
        } else {
            0.0
        };
        let alpha = -Self::GRAVITY_OVER_LENGTH * self.theta.sin() - Self::DAMPING * self.omega + drive;
        self.omega += alpha * self.dt;
        self.theta += self.omega * self.dt;
    }

    fn encoder_counts(&self) -> i32 {
        ((self.theta - self.zero_offset) * COUNTS_PER_REV / (2.0 * PI)).round() as i32
    }
}

impl Hardware for SimulatedPendulum {
    fn read_inputs(&mut self) -> Result<InputSample, HardwareError> {
        if !self.open {
            return Err(HardwareError::NotOpen);
        }
        self.step();
        self.reads += 1;
        if let Some(n) = self.glitch_every {
            if self.reads % n == 0 {
                self.fault_latched = true;
                return Err(HardwareError::Glitch("encoder"));
            }
        }
        let midori = Self::MIDORI_CENTER + Self::MIDORI_VOLTS_PER_RAD * self.theta;
        Ok(InputSample {
            sense: if self.actuating { Self::SENSE_GAIN * self.command } else { 0.0 },
            midori: midori.clamp(0.0, 5.0),
            encoder: self.encoder_counts(),
        })
    }

    fn write_outputs(&mut self, outputs: &OutputCommand) -> Result<(), HardwareError> {
        if !self.open {
            return Err(HardwareError::NotOpen);
        }
        self.command = outputs.command;
        Ok(())
    }

    fn zero_reference(&mut self) {
        self.zero_offset = self.theta;
    }

    fn clear_faults(&mut self) -> bool {
        std::mem::take(&mut self.fault_latched)
    }

    fn enable_actuation(&mut self) {
        self.actuating = true;
    }

    fn disable_actuation(&mut self) {
        self.actuating = false;
        self.command = 0.0;
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_outputs_are_neutral() {
        let outputs = OutputCommand::actuated(3.2, false);
        assert_eq!(outputs, OutputCommand::neutral());
        let outputs = OutputCommand::actuated(3.2, true);
        assert_eq!(outputs.command, 3.2);
        assert!(outputs.enable_line);
        assert_eq!(outputs.leds, [true; LED_COUNT]);
    }

    #[test]
    fn free_pendulum_swings_back_through_zero() {
        let mut plant = SimulatedPendulum::new(Duration::from_millis(1)).with_initial_angle(0.5);
        let first = plant.read_inputs().unwrap();
        assert!(first.encoder > 0);
        let mut crossed = false;
        for _ in 0..2000 {
            if plant.read_inputs().unwrap().encoder < 0 {
                crossed = true;
                break;
            }
        }
        assert!(crossed);
    }

    #[test]
    fn zero_reference_rebaselines_the_encoder() {
        let mut plant = SimulatedPendulum::new(Duration::from_millis(1)).with_initial_angle(0.5);
        plant.read_inputs().unwrap();
        plant.zero_reference();
        let after = plant.read_inputs().unwrap();
        assert!(after.encoder.abs() <= 1, "encoder {}", after.encoder);
    }

    #[test]
    fn glitches_latch_a_fault() {
        let mut plant = SimulatedPendulum::new(Duration::from_millis(1)).with_glitch_every(3);
        assert!(plant.read_inputs().is_ok());
        assert!(plant.read_inputs().is_ok());
        assert!(matches!(plant.read_inputs(), Err(HardwareError::Glitch(_))));
        assert!(plant.clear_faults());
        assert!(!plant.clear_faults());
    }

    #[test]
    fn closed_board_rejects_io() {
        let mut plant = SimulatedPendulum::new(Duration::from_millis(1));
        plant.close();
        assert!(matches!(plant.read_inputs(), Err(HardwareError::NotOpen)));
        assert!(plant.write_outputs(&OutputCommand::neutral()).is_err());
    }
}
