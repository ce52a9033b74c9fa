use common::config::PidGains;

/// Textbook PID with integral clamping and a saturated output.
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    limit: f64,
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    const INTEGRAL_LIMIT: f64 = 100.0;

    pub fn new(gains: PidGains, limit: f64) -> Self {
        Self {
            gains,
            limit: limit.abs(),
            integral: 0.0,
            prev_error: None,
        }
    }

    pub fn compute(&mut self, error: f64, dt: f64) -> f64 {
        self.integral = (self.integral + error * dt).clamp(-Self::INTEGRAL_LIMIT, Self::INTEGRAL_LIMIT);

        // no derivative kick on the first sample
        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error - prev) / dt,
            _ => 0.0,
        };
        self.prev_error = Some(error);

        let output = self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        output.clamp(-self.limit, self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains { kp, ki, kd }
    }

    #[test]
    fn proportional_only() {
        let mut pid = PidController::new(gains(2.0, 0.0, 0.0), 10.0);
        assert_eq!(pid.compute(1.5, 0.001), 3.0);
    }

    #[test]
    fn output_saturates() {
        let mut pid = PidController::new(gains(100.0, 0.0, 0.0), 10.0);
        assert_eq!(pid.compute(1.0, 0.001), 10.0);
        assert_eq!(pid.compute(-1.0, 0.001), -10.0);
    }

    #[test]
    fn derivative_starts_after_first_sample() {
        let mut pid = PidController::new(gains(0.0, 0.0, 1.0), 1000.0);
        assert_eq!(pid.compute(1.0, 0.1), 0.0);
        assert!((pid.compute(2.0, 0.1) - 10.0).abs() < 1e-9);
    }
}
