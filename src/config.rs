// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! The board configuration is a TOML file with INI-compatible sections.
//! Default path: `/etc/rockpi-penta.conf`
//!
//! Every key is optional. A missing file yields [`Config::default`]; a file that
//! can't be read or parsed is reported to the caller, which falls back to the
//! defaults as well.

use crate::button::{self, ButtonEvent};
use crate::fan::FanLevels;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rockpi-penta.conf";

/// Default CPU thermal zone, reporting millidegrees Celsius.
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Default key sampling rate in Hz.
pub const DEFAULT_SAMPLE_RATE: f64 = 10.0;

/// Bounds for the fan and slider periods, in seconds.
pub const MIN_PERIOD_SECS: f64 = 0.1;
pub const MAX_PERIOD_SECS: f64 = 86_400.0;

/// Upper bound for the gesture timings, in seconds.
pub const MAX_GESTURE_SECS: f64 = 60.0;

/// Bounds for the key sampling rate, in Hz.
pub const MIN_SAMPLE_RATE: f64 = 1.0;
pub const MAX_SAMPLE_RATE: f64 = 1000.0;

/// Default PWM period: 25 kHz, the usual 4-pin fan frequency.
pub const DEFAULT_PWM_PERIOD_NS: u64 = 40_000;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration snapshot. Loaded once and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Fan thresholds and timing.
    #[serde(default)]
    pub fan: FanConfig,

    /// Key gesture to action bindings.
    #[serde(default)]
    pub key: KeyConfig,

    /// Gesture timings.
    #[serde(default)]
    pub time: TimeConfig,

    /// Status slider behaviour.
    #[serde(default)]
    pub slider: SliderConfig,

    /// Display options.
    #[serde(default)]
    pub oled: OledConfig,

    /// Identity used for user-scoped external commands.
    #[serde(default)]
    pub user: UserConfig,

    /// Disks shown on the disk page.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Farm status page.
    #[serde(default)]
    pub farm: FarmConfig,

    /// Pin and channel assignments.
    #[serde(default)]
    pub board: BoardConfig,
}

/// Fan temperature thresholds in degrees Celsius, plus controller timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanConfig {
    #[serde(default = "default_lv0")]
    pub lv0: f64,
    #[serde(default = "default_lv1")]
    pub lv1: f64,
    #[serde(default = "default_lv2")]
    pub lv2: f64,
    #[serde(default = "default_lv3")]
    pub lv3: f64,

    /// Seconds between fan re-evaluations.
    #[serde(default = "default_fan_interval")]
    pub interval: f64,

    /// Spin the fans at full speed when the daemon exits.
    #[serde(default = "default_true")]
    pub full_speed_on_exit: bool,
}

impl FanConfig {
    pub fn levels(&self) -> FanLevels {
        FanLevels {
            lv0: self.lv0,
            lv1: self.lv1,
            lv2: self.lv2,
            lv3: self.lv3,
        }
    }
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            lv0: default_lv0(),
            lv1: default_lv1(),
            lv2: default_lv2(),
            lv3: default_lv3(),
            interval: default_fan_interval(),
            full_speed_on_exit: true,
        }
    }
}

/// What a key gesture does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyAction {
    /// Advance the slider to the next page.
    Slider,
    /// Toggle the fan running flag.
    Switch,
    Reboot,
    Poweroff,
    /// Do nothing.
    None,
    /// Run an arbitrary shell command.
    Command(String),
}

impl From<String> for KeyAction {
    fn from(s: String) -> Self {
        match s.trim() {
            "slider" => KeyAction::Slider,
            "switch" => KeyAction::Switch,
            "reboot" => KeyAction::Reboot,
            "poweroff" => KeyAction::Poweroff,
            "none" | "" => KeyAction::None,
            other => KeyAction::Command(other.to_string()),
        }
    }
}

impl From<KeyAction> for String {
    fn from(action: KeyAction) -> Self {
        action.to_string()
    }
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAction::Slider => f.write_str("slider"),
            KeyAction::Switch => f.write_str("switch"),
            KeyAction::Reboot => f.write_str("reboot"),
            KeyAction::Poweroff => f.write_str("poweroff"),
            KeyAction::None => f.write_str("none"),
            KeyAction::Command(cmd) => f.write_str(cmd),
        }
    }
}

/// Gesture bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub click: KeyAction,
    pub twice: KeyAction,
    pub press: KeyAction,
}

impl KeyConfig {
    /// The action bound to a classified gesture.
    pub fn action_for(&self, event: ButtonEvent) -> &KeyAction {
        match event {
            ButtonEvent::Click => &self.click,
            ButtonEvent::DoubleClick => &self.twice,
            ButtonEvent::LongPress => &self.press,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            click: KeyAction::Slider,
            twice: KeyAction::Switch,
            press: KeyAction::None,
        }
    }
}

/// Gesture timings in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Idle time after a tap that rules out a second tap.
    pub twice: f64,
    /// Hold time that makes a long press.
    pub press: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            twice: 0.7,
            press: 1.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliderConfig {
    /// Advance pages automatically.
    pub auto: bool,
    /// Seconds per page.
    pub time: f64,
}

impl Default for SliderConfig {
    fn default() -> Self {
        Self {
            auto: true,
            time: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OledConfig {
    /// Rotate the display by 180 degrees.
    pub rotate: bool,
    /// Show temperatures in Fahrenheit.
    #[serde(rename = "f-temp")]
    pub fahrenheit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub user_uid: u32,
    pub user_gid: u32,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_uid: 1000,
            user_gid: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Mount points to report. Accepts a list or a single `|`-separated string.
    /// Empty means "report every `sd*` block device".
    #[serde(deserialize_with = "deserialize_mount_points")]
    pub mnt_points: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Add the farm status page to the slider.
    pub enabled: bool,
}

/// A sysfs PWM channel, i.e. `/sys/class/pwm/pwmchip{chip}/pwm{channel}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmChannel {
    pub chip: u32,
    pub channel: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// sysfs GPIO number of the top-board key.
    pub button_gpio: u32,
    /// Key sampling rate in Hz.
    pub sample_rate: f64,
    pub pwm_period_ns: u64,
    /// Optional output line driven once at startup.
    pub enable_gpio: Option<u32>,
    pub enable_level: bool,
    pub thermal_path: PathBuf,
    /// Fan PWM channels. All channels receive the same duty cycle.
    pub pwm: Vec<PwmChannel>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            button_gpio: 146,
            sample_rate: DEFAULT_SAMPLE_RATE,
            pwm_period_ns: DEFAULT_PWM_PERIOD_NS,
            enable_gpio: None,
            enable_level: true,
            thermal_path: PathBuf::from(DEFAULT_THERMAL_PATH),
            pwm: vec![
                PwmChannel { chip: 0, channel: 0 },
                PwmChannel { chip: 1, channel: 0 },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Check the invariants the daemon relies on. Called once at startup; an
    /// error here is fatal rather than silently misbehaving later.
    pub fn validate(&self) -> Result<(), String> {
        self.fan.levels().validate()?;

        within("fan.interval", self.fan.interval, MIN_PERIOD_SECS, MAX_PERIOD_SECS)?;
        within("slider.time", self.slider.time, MIN_PERIOD_SECS, MAX_PERIOD_SECS)?;
        within("time.twice", self.time.twice, 0.0, MAX_GESTURE_SECS)?;
        within("time.press", self.time.press, 0.0, MAX_GESTURE_SECS)?;
        within(
            "board.sample_rate",
            self.board.sample_rate,
            MIN_SAMPLE_RATE,
            MAX_SAMPLE_RATE,
        )?;
        if self.time.twice >= self.time.press {
            return Err(format!(
                "time.twice ({}) must be shorter than time.press ({})",
                self.time.twice, self.time.press
            ));
        }
        if self.board.pwm_period_ns == 0 {
            return Err("board.pwm_period_ns must be positive".to_string());
        }

        let gap_len = button::samples(self.time.twice, self.board.sample_rate);
        let press_len = button::samples(self.time.press, self.board.sample_rate);
        if gap_len == 0 || press_len == 0 {
            return Err(format!(
                "gesture timings are shorter than one sample at {} Hz",
                self.board.sample_rate
            ));
        }
        if gap_len >= press_len {
            return Err(format!(
                "time.twice and time.press round to {gap_len} and {press_len} samples; \
                 the double-click gap must be shorter"
            ));
        }

        Ok(())
    }
}

/// Accept a finite `value` in `[min, max]`. Keeps every period convertible to a
/// non-zero `Duration`.
fn within(name: &str, value: f64, min: f64, max: f64) -> Result<(), String> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} must be between {min} and {max}, got {value}"))
    }
}

// ---------------------------------------------------------------------------
// Load / Render
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse config from TOML text.
pub fn parse_config(contents: &str) -> io::Result<Config> {
    toml::from_str(contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })
}

/// Render a config as TOML, e.g. to print the effective settings.
pub fn render_config(config: &Config) -> io::Result<String> {
    toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_lv0() -> f64 {
    35.0
}

fn default_lv1() -> f64 {
    40.0
}

fn default_lv2() -> f64 {
    45.0
}

fn default_lv3() -> f64 {
    50.0
}

fn default_fan_interval() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MountList {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_mount_points<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let points = match MountList::deserialize(deserializer)? {
        MountList::Joined(s) => s.split('|').map(str::to_string).collect(),
        MountList::List(v) => v,
    };
    Ok(points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_file_is_default() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, Config::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.fan.levels(), FanLevels { lv0: 35.0, lv1: 40.0, lv2: 45.0, lv3: 50.0 });
        assert_eq!(cfg.key.click, KeyAction::Slider);
        assert_eq!(cfg.key.twice, KeyAction::Switch);
        assert_eq!(cfg.key.press, KeyAction::None);
        assert_eq!(cfg.time.twice, 0.7);
        assert_eq!(cfg.time.press, 1.8);
        assert!(cfg.slider.auto);
        assert_eq!(cfg.slider.time, 10.0);
        assert!(!cfg.oled.rotate);
        assert!(!cfg.oled.fahrenheit);
        assert_eq!(cfg.user.user_uid, 1000);
        assert!(cfg.disk.mnt_points.is_empty());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let cfg = parse_config(
            r#"
            [fan]
            lv0 = 30
            lv3 = 60.5

            [key]
            press = "poweroff"

            [oled]
            f-temp = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fan.lv0, 30.0);
        assert_eq!(cfg.fan.lv1, 40.0);
        assert_eq!(cfg.fan.lv3, 60.5);
        assert_eq!(cfg.key.click, KeyAction::Slider);
        assert_eq!(cfg.key.press, KeyAction::Poweroff);
        assert!(cfg.oled.fahrenheit);
        assert_eq!(cfg.slider, SliderConfig::default());
    }

    #[test]
    fn test_unknown_action_is_command() {
        let cfg = parse_config("[key]\nclick = \"systemctl restart smbd\"\n").unwrap();
        assert_eq!(
            cfg.key.click,
            KeyAction::Command("systemctl restart smbd".to_string())
        );
        assert_eq!(cfg.key.action_for(ButtonEvent::Click), &cfg.key.click);
        assert_eq!(cfg.key.action_for(ButtonEvent::DoubleClick), &KeyAction::Switch);
    }

    #[test]
    fn test_mount_points_joined_string() {
        let cfg = parse_config("[disk]\nmnt_points = \"/mnt/a| /srv/b |\"\n").unwrap();
        assert_eq!(cfg.disk.mnt_points, vec!["/mnt/a", "/srv/b"]);
    }

    #[test]
    fn test_mount_points_list() {
        let cfg = parse_config("[disk]\nmnt_points = [\"/mnt/a\", \"\"]\n").unwrap();
        assert_eq!(cfg.disk.mnt_points, vec!["/mnt/a"]);
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(parse_config("[fan]\nlv0 = \"hot\"\n").is_err());
        assert!(parse_config("not toml at all [").is_err());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.conf")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("penta.conf");
        fs::write(&path, "[slider]\nauto = false\ntime = 4\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(!cfg.slider.auto);
        assert_eq!(cfg.slider.time, 4.0);
    }

    #[test]
    fn test_render_parses_back() {
        let mut cfg = Config::default();
        cfg.key.press = KeyAction::Command("echo hi".to_string());
        cfg.board.enable_gpio = Some(23);
        let text = render_config(&cfg).unwrap();
        assert_eq!(parse_config(&text).unwrap(), cfg);
    }

    #[test]
    fn test_validation_thresholds() {
        let mut cfg = Config::default();
        cfg.fan.lv2 = 39.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_timings() {
        let mut cfg = Config::default();
        cfg.time.press = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.time.twice = 2.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.board.sample_rate = 1.0;
        cfg.time.twice = 0.2;
        assert!(cfg.validate().is_err(), "gap rounds to zero samples");

        let mut cfg = Config::default();
        cfg.slider.time = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_periods_that_do_not_fit_a_duration() {
        for bad in [1e-10, 1e20, f64::INFINITY] {
            let mut cfg = Config::default();
            cfg.fan.interval = bad;
            assert!(cfg.validate().is_err(), "fan.interval = {bad}");

            let mut cfg = Config::default();
            cfg.slider.time = bad;
            assert!(cfg.validate().is_err(), "slider.time = {bad}");

            let mut cfg = Config::default();
            cfg.time.press = bad;
            assert!(cfg.validate().is_err(), "time.press = {bad}");
        }

        let mut cfg = Config::default();
        cfg.board.sample_rate = 1e-30;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.fan.interval = MIN_PERIOD_SECS;
        cfg.slider.time = MAX_PERIOD_SECS;
        assert!(cfg.validate().is_ok());
        assert!(!Duration::from_secs_f64(cfg.fan.interval).is_zero());
        assert!(!Duration::from_secs_f64(1.0 / MAX_SAMPLE_RATE).is_zero());
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(resolve_config_path(None), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(
            resolve_config_path(Some("/tmp/x.conf")),
            PathBuf::from("/tmp/x.conf")
        );
    }
}
