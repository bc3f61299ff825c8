// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan threshold table and duty-cycle controller.
//!
//! Four ascending temperature thresholds select a fixed duty cycle. The fan PWM
//! line on the Penta top board is inverted: `0.0` is full speed and values near
//! `1.0` stop the fan.

use crate::board::DutyOutput;
use serde::{Deserialize, Serialize};

/// Duty cycle below every threshold.
pub const IDLE_DUTY: f64 = 0.999;

/// Duty cycle while the running flag is cleared.
pub const STOPPED_DUTY: f64 = 0.999;

/// Duty cycle that spins the fans at full speed.
pub const FULL_SPEED_DUTY: f64 = 0.0;

/// Temperature thresholds in degrees Celsius, `lv0 < lv1 < lv2 < lv3`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanLevels {
    pub lv0: f64,
    pub lv1: f64,
    pub lv2: f64,
    pub lv3: f64,
}

impl FanLevels {
    /// Thresholds paired with their duty cycle, hottest first.
    pub fn table(&self) -> [(f64, f64); 4] {
        [
            (self.lv3, 0.0),
            (self.lv2, 0.25),
            (self.lv1, 0.5),
            (self.lv0, 0.75),
        ]
    }

    /// Duty cycle for a temperature: the first threshold the reading meets or
    /// exceeds, walking down from `lv3`, or [`IDLE_DUTY`] below `lv0`.
    pub fn duty_cycle(&self, temp_c: f64) -> f64 {
        self.table()
            .into_iter()
            .find(|&(threshold, _)| temp_c >= threshold)
            .map(|(_, duty)| duty)
            .unwrap_or(IDLE_DUTY)
    }

    /// Validate the thresholds are finite and strictly increasing.
    pub fn validate(&self) -> Result<(), String> {
        let ascending = [self.lv0, self.lv1, self.lv2, self.lv3];
        if let Some(bad) = ascending.iter().find(|t| !t.is_finite()) {
            return Err(format!("Fan threshold {bad} is not a finite temperature"));
        }
        for (i, pair) in ascending.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(format!(
                    "Fan thresholds must be strictly increasing (lv{} = {} >= lv{} = {})",
                    i,
                    pair[0],
                    i + 1,
                    pair[1]
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Applies the threshold table to a set of PWM outputs.
///
/// Outputs are only written when the duty cycle changes. A failed write leaves
/// that output marked dirty so the next cycle tries again.
pub struct FanController<P> {
    levels: FanLevels,
    outputs: Vec<Output<P>>,
}

struct Output<P> {
    pwm: P,
    written: Option<f64>,
}

impl<P: DutyOutput> FanController<P> {
    pub fn new(levels: FanLevels, outputs: Vec<P>) -> Self {
        Self {
            levels,
            outputs: outputs
                .into_iter()
                .map(|pwm| Output { pwm, written: None })
                .collect(),
        }
    }

    /// Duty cycle the fans should run at. A cleared running flag overrides the table.
    pub fn target(&self, temp_c: f64, running: bool) -> f64 {
        if running {
            self.levels.duty_cycle(temp_c)
        } else {
            STOPPED_DUTY
        }
    }

    /// Compute the target and push it to every output that isn't already there.
    pub fn apply(&mut self, temp_c: f64, running: bool) -> f64 {
        let duty = self.target(temp_c, running);
        self.write_all(duty);
        duty
    }

    /// Push a fixed duty cycle, bypassing the table.
    pub fn force(&mut self, duty: f64) {
        self.write_all(duty);
    }

    /// Leave the fans at full speed, for use when the controller goes away.
    pub fn release(&mut self) {
        self.write_all(FULL_SPEED_DUTY);
    }

    /// Last duty cycle successfully written to every output, if they agree.
    pub fn current(&self) -> Option<f64> {
        let first = self.outputs.first()?.written?;
        self.outputs
            .iter()
            .all(|o| o.written == Some(first))
            .then_some(first)
    }

    fn write_all(&mut self, duty: f64) {
        for output in &mut self.outputs {
            if output.written == Some(duty) {
                continue;
            }
            match output.pwm.write_duty(duty) {
                Ok(()) => {
                    if output.written.is_none() {
                        log::info!("Fan {} duty cycle set to {duty}", output.pwm.name());
                    } else {
                        log::debug!("Fan {} duty cycle set to {duty}", output.pwm.name());
                    }
                    output.written = Some(duty);
                }
                Err(e) => {
                    log::error!("Failed to write duty cycle for {}: {e}", output.pwm.name());
                    output.written = None;
                }
            }
        }
    }
}
