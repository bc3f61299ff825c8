// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! sysfs access to the board: GPIO lines, PWM channels and the CPU thermal zone.
//!
//! GPIO lines live under `/sys/class/gpio/gpioN/` and PWM channels under
//! `/sys/class/pwm/pwmchipN/pwmM/`. Both are exported on open if the kernel
//! hasn't exposed them yet.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

pub const GPIO_ROOT: &str = "/sys/class/gpio";
pub const PWM_ROOT: &str = "/sys/class/pwm";

/// How long to wait for udev to populate a freshly exported node.
const EXPORT_SETTLE_TRIES: u32 = 20;
const EXPORT_SETTLE_STEP: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A digital input line.
pub trait DigitalInput {
    /// Current line level, `true` for high.
    fn read_level(&mut self) -> io::Result<bool>;
}

/// A PWM channel driven by a duty-cycle fraction.
pub trait DutyOutput {
    /// Short name for log messages.
    fn name(&self) -> String;

    /// Write a duty cycle in `[0, 1]`.
    fn write_duty(&mut self, fraction: f64) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// GPIO
// ---------------------------------------------------------------------------

/// Direction of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// An exported sysfs GPIO line.
#[derive(Debug, Clone)]
pub struct Gpio {
    pub number: u32,
    value_path: PathBuf,
}

impl Gpio {
    /// Export `number` under `root` if needed and set its direction.
    pub fn open_at(root: &Path, number: u32, direction: Direction) -> io::Result<Self> {
        let dir = root.join(format!("gpio{number}"));
        if !dir.exists() {
            fs::write(root.join("export"), number.to_string())?;
            wait_for(&dir.join("direction"))?;
        }
        fs::write(dir.join("direction"), direction.as_str())?;

        Ok(Self {
            number,
            value_path: dir.join("value"),
        })
    }

    pub fn open_input(number: u32) -> io::Result<Self> {
        Self::open_at(Path::new(GPIO_ROOT), number, Direction::In)
    }

    pub fn open_output(number: u32) -> io::Result<Self> {
        Self::open_at(Path::new(GPIO_ROOT), number, Direction::Out)
    }

    /// Drive an output line.
    pub fn write(&self, high: bool) -> io::Result<()> {
        fs::write(&self.value_path, if high { "1" } else { "0" })
    }
}

impl DigitalInput for Gpio {
    fn read_level(&mut self) -> io::Result<bool> {
        let raw = fs::read_to_string(&self.value_path)?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("gpio{}: unexpected value {other:?}", self.number),
            )),
        }
    }
}

/// Open an output line and drive it once. Used for board enable pins.
pub fn set_line(number: u32, high: bool) -> io::Result<()> {
    Gpio::open_output(number)?.write(high)
}

// ---------------------------------------------------------------------------
// PWM
// ---------------------------------------------------------------------------

/// An exported and enabled sysfs PWM channel.
#[derive(Debug, Clone)]
pub struct Pwm {
    chip: u32,
    channel: u32,
    period_ns: u64,
    duty_path: PathBuf,
}

impl Pwm {
    /// Export `pwmchip{chip}/pwm{channel}` under `root`, set its period and enable it.
    pub fn open_at(root: &Path, chip: u32, channel: u32, period_ns: u64) -> io::Result<Self> {
        let chip_dir = root.join(format!("pwmchip{chip}"));
        let dir = chip_dir.join(format!("pwm{channel}"));
        if !dir.exists() {
            fs::write(chip_dir.join("export"), channel.to_string())?;
            wait_for(&dir.join("period"))?;
        }

        // duty_cycle may never exceed period, so clear it before changing the period.
        let duty_path = dir.join("duty_cycle");
        if let Err(e) = fs::write(&duty_path, "0") {
            log::debug!("pwmchip{chip}/pwm{channel}: clearing duty cycle failed: {e}");
        }
        fs::write(dir.join("period"), period_ns.to_string())?;
        fs::write(dir.join("enable"), "1")?;

        Ok(Self {
            chip,
            channel,
            period_ns,
            duty_path,
        })
    }

    pub fn open(chip: u32, channel: u32, period_ns: u64) -> io::Result<Self> {
        Self::open_at(Path::new(PWM_ROOT), chip, channel, period_ns)
    }

    /// Nanoseconds of high time for a duty fraction, clamped to the period.
    pub fn duty_ns(&self, fraction: f64) -> u64 {
        let fraction = if fraction.is_nan() { 1.0 } else { fraction.clamp(0.0, 1.0) };
        (fraction * self.period_ns as f64).round() as u64
    }
}

impl DutyOutput for Pwm {
    fn name(&self) -> String {
        format!("pwmchip{}/pwm{}", self.chip, self.channel)
    }

    fn write_duty(&mut self, fraction: f64) -> io::Result<()> {
        fs::write(&self.duty_path, self.duty_ns(fraction).to_string())
    }
}

// ---------------------------------------------------------------------------
// Thermal
// ---------------------------------------------------------------------------

/// Read a thermal zone reporting millidegrees Celsius.
pub fn read_temperature(path: &Path) -> io::Result<f64> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse::<i64>()
        .map(|millic| millic as f64 / 1000.0)
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: bad temperature {:?}: {e}", path.display(), raw.trim()),
            )
        })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wait_for(path: &Path) -> io::Result<()> {
    for _ in 0..EXPORT_SETTLE_TRIES {
        if path.exists() {
            return Ok(());
        }
        thread::sleep(EXPORT_SETTLE_STEP);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} did not appear after export", path.display()),
    ))
}
