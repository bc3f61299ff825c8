// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! One-shot board setup: enable the fan PWM channels and the display I2C bus in
//! the boot interface configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default boot interface configuration file.
pub const HW_INTFC_PATH: &str = "/boot/hw_intfc.conf";

const INTERFACES: [(&str, &str); 3] = [
    ("intfc:pwm0=off", "intfc:pwm0=on"),
    ("intfc:pwm1=off", "intfc:pwm1=on"),
    ("intfc:i2c7=off", "intfc:i2c7=on"),
];

/// Switch the interfaces on in `contents`. Returns `None` when nothing changes.
pub fn enable_interfaces(contents: &str) -> Option<String> {
    let mut updated = contents.to_string();
    for (off, on) in INTERFACES {
        updated = updated.replace(off, on);
    }
    (updated != contents).then_some(updated)
}

/// Backup path next to the edited file: `<file>.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Apply [`enable_interfaces`] to the file at `path`, saving the original as
/// `<file>.bak` first. Returns whether the file changed. A reboot is needed for
/// the change to take effect.
pub fn open_pwm_i2c(path: &Path) -> io::Result<bool> {
    let contents = fs::read_to_string(path)?;
    let Some(updated) = enable_interfaces(&contents) else {
        log::info!("{} already enables pwm0, pwm1 and i2c7", path.display());
        return Ok(false);
    };

    let backup = backup_path(path);
    fs::copy(path, &backup)?;
    fs::write(path, updated)?;
    log::info!(
        "Enabled pwm0, pwm1 and i2c7 in {} (original saved as {})",
        path.display(),
        backup.display()
    );
    Ok(true)
}
