use std::f64::consts::PI;

use common::config::ControlConfig;
use common::{truncate_utf8, Mode, PlotPoint, MAX_LABEL_LEN, MAX_PLOTS};

use crate::hardware::{InputSample, COUNTS_PER_REV};
use crate::pid::PidController;

/// User plot values collected during one tick.
///
/// Holds at most [`MAX_PLOTS`] points; later calls in the same tick are dropped.
/// Labels are cut to [`MAX_LABEL_LEN`] bytes.
#[derive(Debug, Default)]
pub struct Plots {
    points: Vec<PlotPoint>,
}

impl Plots {
    pub fn new() -> Self {
        Self {
            points: Vec::with_capacity(MAX_PLOTS),
        }
    }

    pub fn plot(&mut self, label: &str, value: f64) {
        if self.points.len() < MAX_PLOTS {
            let mut label = label.to_string();
            truncate_utf8(&mut label, MAX_LABEL_LEN);
            self.points.push(PlotPoint { label, value });
        }
    }

    pub fn take(&mut self) -> Vec<PlotPoint> {
        std::mem::replace(&mut self.points, Vec::with_capacity(MAX_PLOTS))
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Control function supplied by the user, one entry point per feedback mode.
///
/// The loop is generic over the law, so the per-mode selection in
/// [`ControlLaw::compute`] is a plain `match` with no dynamic dispatch.
pub trait ControlLaw: Send {
    /// Command voltage from encoder position feedback.
    fn encoder(&mut self, time: f64, counts: i32, plots: &mut Plots) -> f64;

    /// Command voltage from Midori potentiometer feedback.
    fn midori(&mut self, time: f64, volts: f64, plots: &mut Plots) -> f64;

    fn compute(&mut self, mode: Mode, time: f64, input: &InputSample, plots: &mut Plots) -> f64 {
        match mode {
            Mode::Encoder => self.encoder(time, input.encoder, plots),
            Mode::Midori => self.midori(time, input.midori, plots),
        }
    }
}

/// Default law: PID tracking of a slow sine reference on either sensor.
#[derive(Debug, Clone)]
pub struct PidLaw {
    encoder_pid: PidController,
    midori_pid: PidController,
    last_time: Option<f64>,
}

impl PidLaw {
    const REFERENCE_AMPLITUDE: f64 = 0.5;
    const REFERENCE_HZ: f64 = 0.5;
    const MIDORI_CENTER: f64 = 2.5;
    const MIDORI_RAD_PER_VOLT: f64 = 1.0;

    pub fn new(config: &ControlConfig) -> Self {
        Self {
            encoder_pid: PidController::new(config.encoder, config.command_limit),
            midori_pid: PidController::new(config.midori, config.command_limit),
            last_time: None,
        }
    }

    fn reference(time: f64) -> f64 {
        Self::REFERENCE_AMPLITUDE * (2.0 * PI * Self::REFERENCE_HZ * time).sin()
    }

    fn dt(&mut self, time: f64) -> f64 {
        let dt = self.last_time.map_or(0.0, |last| (time - last).max(0.0));
        self.last_time = Some(time);
        dt
    }
}

impl ControlLaw for PidLaw {
    fn encoder(&mut self, time: f64, counts: i32, plots: &mut Plots) -> f64 {
        let dt = self.dt(time);
        let angle = counts as f64 * 2.0 * PI / COUNTS_PER_REV;
        let reference = Self::reference(time);
        let error = reference - angle;
        plots.plot("reference", reference);
        plots.plot("error", error);
        self.encoder_pid.compute(error, dt)
    }

    fn midori(&mut self, time: f64, volts: f64, plots: &mut Plots) -> f64 {
        let dt = self.dt(time);
        let angle = (volts - Self::MIDORI_CENTER) * Self::MIDORI_RAD_PER_VOLT;
        let reference = Self::reference(time);
        let error = reference - angle;
        plots.plot("reference", reference);
        plots.plot("error", error);
        self.midori_pid.compute(error, dt)
    }
}
