use std::time::Duration;

use tracing::{info, trace, warn};

use common::config::ControllerConfig;
use common::{Sample, SENTINEL_TICK};

use crate::hardware::{Hardware, InputSample, OutputCommand};
use crate::law::{ControlLaw, Plots};
use crate::rate::RateMonitor;
use crate::shared::{LoopMetrics, SharedStatus, TickSnapshot};
use crate::telemetry::TelemetrySender;
use crate::timer::LoopTimer;

/// Summary of a finished control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopReport {
    pub ticks: u64,
    pub misses: u64,
    pub samples_sent: u64,
    pub samples_dropped: u64,
}

/// The real-time thread body: one sample per tick until a stop is requested.
pub struct ControlLoop<H: Hardware, L: ControlLaw> {
    hardware: H,
    law: L,
    shared: SharedStatus,
    telemetry: TelemetrySender,
    period: Duration,
    rate_interval: Duration,
    plots: Plots,
    last_input: InputSample,
}

impl<H: Hardware, L: ControlLaw> ControlLoop<H, L> {
    pub fn new(
        config: &ControllerConfig,
        hardware: H,
        law: L,
        shared: SharedStatus,
        telemetry: TelemetrySender,
    ) -> Self {
        Self {
            hardware,
            law,
            shared,
            telemetry,
            period: config.period(),
            rate_interval: config.rate_interval(),
            plots: Plots::new(),
            last_input: InputSample::default(),
        }
    }

    pub fn run(mut self) -> LoopReport {
        info!(
            "Starting control thread at {:.1} Hz.",
            1.0 / self.period.as_secs_f64()
        );
        self.hardware.zero_reference();
        self.hardware.enable_actuation();

        let mut timer = LoopTimer::new(self.period);
        let mut monitor = RateMonitor::new(self.rate_interval);
        loop {
            let snapshot = self.shared.tick_snapshot();
            if snapshot.stop {
                break;
            }
            self.tick(snapshot, &timer);
            monitor.tick();
            monitor.update(timer.elapsed_time());
            self.shared.publish(LoopMetrics {
                running: true,
                frequency: monitor.rate(),
                misses: clamp_count(timer.misses()),
                wait_ratio: timer.wait_ratio(),
            });
            timer.wait();
        }
        self.finish(&timer, &monitor)
    }

    fn tick(&mut self, snapshot: TickSnapshot, timer: &LoopTimer) {
        let tick = tick_number(timer.elapsed_ticks());

        if self.shared.take_zero_request() {
            self.hardware.zero_reference();
            info!("Zeroed position reference.");
        }
        if self.hardware.clear_faults() {
            trace!("Clearing encoder error");
        }

        let input = match self.hardware.read_inputs() {
            Ok(input) => {
                self.last_input = input;
                input
            }
            Err(err) => {
                warn!(tick, "{err}; reusing last input");
                self.last_input
            }
        };

        let time = timer.elapsed_time_ideal().as_secs_f64();
        let command = self.law.compute(snapshot.mode, time, &input, &mut self.plots);

        let outputs = OutputCommand::actuated(command, snapshot.enabled);
        if let Err(err) = self.hardware.write_outputs(&outputs) {
            warn!(tick, "failed to write outputs: {err}");
        }

        self.telemetry.send(&Sample {
            tick,
            time,
            sense: input.sense,
            command,
            midori: input.midori,
            encoder: input.encoder,
            enable: snapshot.enabled,
            plots: self.plots.take(),
        });
    }

    /// Safe-state pass: neutral outputs, a last disabled sample, the
    /// end-of-stream sentinel, then release of the board.
    fn finish(mut self, timer: &LoopTimer, monitor: &RateMonitor) -> LoopReport {
        if let Err(err) = self.hardware.write_outputs(&OutputCommand::neutral()) {
            warn!("failed to write neutral outputs: {err}");
        }

        let last = Sample {
            tick: tick_number(timer.elapsed_ticks()),
            time: timer.elapsed_time_ideal().as_secs_f64(),
            sense: self.last_input.sense,
            command: 0.0,
            midori: self.last_input.midori,
            encoder: self.last_input.encoder,
            enable: false,
            plots: Vec::new(),
        };
        self.telemetry.send(&last);
        self.telemetry.send(&Sample {
            tick: SENTINEL_TICK,
            ..last
        });
        self.plots.clear();

        self.hardware.disable_actuation();
        self.hardware.close();

        self.shared.publish(LoopMetrics {
            running: false,
            frequency: monitor.rate(),
            misses: clamp_count(timer.misses()),
            wait_ratio: timer.wait_ratio(),
        });

        let report = LoopReport {
            ticks: timer.elapsed_ticks(),
            misses: timer.misses(),
            samples_sent: self.telemetry.sent(),
            samples_dropped: self.telemetry.dropped(),
        };
        info!(
            ticks = report.ticks,
            misses = report.misses,
            dropped = report.samples_dropped,
            "Terminated control thread."
        );
        report
    }
}

/// Wire tick number; wraps within the non-negative range so it can never
/// collide with the sentinel.
fn tick_number(ticks: u64) -> i32 {
    (ticks % (i32::MAX as u64 + 1)) as i32
}

fn clamp_count(count: u64) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}
