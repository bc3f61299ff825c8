// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! System telemetry for the slider pages.
//!
//! Most values come from shell commands. Disk usage is cached for
//! [`DISK_INFO_TTL`] and the farm summary, which takes tens of seconds, for
//! [`FARM_INFO_TTL`]. A lookup that fails shows up as "unavailable" on its line
//! and never reaches the control loop as an error.

use crate::board;
use crate::cache::TtlCache;
use crate::command::{self, UserIdentity};
use crate::config::Config;
use crate::display::{self, Page, PageSource, PageView};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub const DISK_INFO_TTL: Duration = Duration::from_secs(30);
pub const FARM_INFO_TTL: Duration = Duration::from_secs(3600);
pub const FARM_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

const UPTIME_CMD: &str = "uptime -p";
const IP_CMD: &str = "hostname -I";
const LOADAVG_CMD: &str = "cat /proc/loadavg";
const MEMORY_CMD: &str = "free -m";
const DF_CMD: &str = "df -P -BG";
const BLOCK_DEVICES_CMD: &str = "lsblk -lno NAME";
const FARM_CMD: &str = "cd chia-blockchain && . ./activate && chia farm summary";

/// Usage of one disk, e.g. `("root", "17%")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUsage {
    pub label: String,
    pub usage: String,
}

/// Parsed `chia farm summary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmStatus {
    pub status: String,
    pub balance: String,
    pub height: String,
}

/// Telemetry lookups with their caches. Owned by the control loop.
pub struct Telemetry {
    thermal_path: PathBuf,
    fahrenheit: bool,
    mnt_points: Vec<String>,
    disks: TtlCache<Vec<DiskUsage>>,
    farm_user: (u32, u32),
    farm: TtlCache<FarmStatus>,
}

impl Telemetry {
    pub fn new(config: &Config) -> Self {
        Self {
            thermal_path: config.board.thermal_path.clone(),
            fahrenheit: config.oled.fahrenheit,
            mnt_points: config.disk.mnt_points.clone(),
            disks: TtlCache::new(DISK_INFO_TTL),
            farm_user: (config.user.user_uid, config.user.user_gid),
            farm: TtlCache::new(FARM_INFO_TTL),
        }
    }

    pub fn cpu_temperature(&self) -> io::Result<f64> {
        board::read_temperature(&self.thermal_path)
    }

    pub async fn uptime(&self) -> io::Result<String> {
        let out = command::run_shell(UPTIME_CMD).await?;
        Ok(format!("Uptime: {}", out.trim_start_matches("up ")))
    }

    pub async fn ip(&self) -> io::Result<String> {
        let out = command::run_shell(IP_CMD).await?;
        out.split_whitespace()
            .next()
            .map(|ip| format!("IP {ip}"))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IP address assigned"))
    }

    pub async fn cpu_load(&self) -> io::Result<String> {
        let out = command::run_shell(LOADAVG_CMD).await?;
        parse_loadavg(&out).map(|load| format!("CPU Load: {load:.2}"))
    }

    pub async fn memory(&self) -> io::Result<String> {
        let out = command::run_shell(MEMORY_CMD).await?;
        let (used, total) = parse_free(&out)?;
        Ok(format!("Mem: {used}/{total}MB"))
    }

    pub async fn root_disk(&self) -> io::Result<String> {
        let out = command::run_shell(DF_CMD).await?;
        let root = parse_df(&out)
            .into_iter()
            .find(|e| e.mount == "/")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no root filesystem in df"))?;
        Ok(format!(
            "Disk: {}/{}GB {}",
            root.used_gb, root.size_gb, root.capacity
        ))
    }

    /// Root usage followed by each configured mount point, or each `sd*` device.
    pub async fn disks(&mut self) -> io::Result<Vec<DiskUsage>> {
        let mnt_points = self.mnt_points.clone();
        self.disks
            .get_or_refresh(|| query_disks(mnt_points))
            .await
    }

    pub async fn farm(&mut self) -> io::Result<FarmStatus> {
        let (uid, gid) = self.farm_user;
        self.farm
            .get_or_refresh(|| async move {
                let identity = UserIdentity::lookup(uid, gid)?;
                log::debug!("Querying farm summary as {}", identity.name);
                let out = identity.run_shell(FARM_CMD, FARM_QUERY_TIMEOUT).await?;
                parse_farm_summary(&out)
            })
            .await
    }
}

impl PageSource for Telemetry {
    async fn collect(&mut self, page: Page) -> PageView {
        let lines = match page {
            Page::System => {
                let temp = self
                    .cpu_temperature()
                    .map(|c| display::format_temperature(c, self.fahrenheit));
                vec![
                    line("Uptime", self.uptime().await),
                    line("CPU Temp", temp),
                    line("IP", self.ip().await),
                ]
            }
            Page::Resources => vec![
                line("CPU Load", self.cpu_load().await),
                line("Mem", self.memory().await),
                line("Disk", self.root_disk().await),
            ],
            Page::Disks => match self.disks().await {
                Ok(disks) => disks
                    .into_iter()
                    .map(|d| format!("{}: {}", d.label, d.usage))
                    .collect(),
                Err(e) => vec![line("Disk", Err::<String, _>(e))],
            },
            Page::Farm => match self.farm().await {
                Ok(farm) => vec![
                    format!("Status: {}", farm.status),
                    format!("XCH: {}", farm.balance),
                    format!("Height: {}", farm.height),
                ],
                Err(e) => vec![line("Farm", Err::<String, _>(e))],
            },
        };
        PageView { page, lines }
    }
}

/// A page line, or an "unavailable" placeholder when the lookup failed.
fn line(label: &str, result: io::Result<String>) -> String {
    result.unwrap_or_else(|e| {
        log::debug!("{label} lookup failed: {e}");
        format!("{label}: unavailable")
    })
}

async fn query_disks(mnt_points: Vec<String>) -> io::Result<Vec<DiskUsage>> {
    let entries = parse_df(&command::run_shell(DF_CMD).await?);
    let block_devices = if mnt_points.is_empty() {
        command::run_shell(BLOCK_DEVICES_CMD).await?
    } else {
        String::new()
    };
    Ok(disk_usage(&entries, &mnt_points, &block_devices))
}

/// Root usage, then one entry per configured mount point (`-` when it isn't
/// mounted). Without mount points, each `sd*` device in `block_devices` (one
/// name per line, as `lsblk -lno NAME` prints) that `df` knows about.
pub fn disk_usage(entries: &[DfEntry], mnt_points: &[String], block_devices: &str) -> Vec<DiskUsage> {
    let by_mount: HashMap<&str, &str> = entries
        .iter()
        .map(|e| (e.mount.as_str(), e.capacity.as_str()))
        .collect();

    let mut disks = Vec::new();
    if let Some(root) = by_mount.get("/") {
        disks.push(DiskUsage {
            label: "root".to_string(),
            usage: root.to_string(),
        });
    }

    if mnt_points.is_empty() {
        let by_device: HashMap<&str, &str> = entries
            .iter()
            .map(|e| (e.filesystem.as_str(), e.capacity.as_str()))
            .collect();
        for name in block_devices.lines().map(str::trim).filter(|n| n.starts_with("sd")) {
            if let Some(usage) = by_device.get(format!("/dev/{name}").as_str()) {
                disks.push(DiskUsage {
                    label: name.to_string(),
                    usage: usage.to_string(),
                });
            }
        }
    } else {
        for mnt in mnt_points {
            let usage = by_mount.get(mnt.as_str()).map_or("-", |u| *u);
            disks.push(DiskUsage {
                label: mount_label(mnt).to_string(),
                usage: usage.to_string(),
            });
        }
    }

    disks
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// One row of `df -P -BG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfEntry {
    pub filesystem: String,
    pub size_gb: String,
    pub used_gb: String,
    pub capacity: String,
    pub mount: String,
}

/// Parse `df -P -BG` output, skipping the header and malformed rows.
pub fn parse_df(out: &str) -> Vec<DfEntry> {
    out.lines()
        .skip(1)
        .filter_map(|row| {
            let cols: Vec<&str> = row.split_whitespace().collect();
            if cols.len() < 6 {
                return None;
            }
            Some(DfEntry {
                filesystem: cols[0].to_string(),
                size_gb: cols[1].trim_end_matches('G').to_string(),
                used_gb: cols[2].trim_end_matches('G').to_string(),
                capacity: cols[4].to_string(),
                // Mount points may contain spaces.
                mount: cols[5..].join(" "),
            })
        })
        .collect()
}

/// Label for a mount point: its last path component.
pub fn mount_label(mnt: &str) -> &str {
    mnt.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("root")
}

/// One-minute load average from `/proc/loadavg`.
pub fn parse_loadavg(out: &str) -> io::Result<f64> {
    out.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| invalid(format!("bad loadavg: {out:?}")))
}

/// `(used, total)` MiB from the `Mem:` row of `free -m`.
pub fn parse_free(out: &str) -> io::Result<(u64, u64)> {
    let row = out
        .lines()
        .find(|l| l.starts_with("Mem:"))
        .ok_or_else(|| invalid("no Mem: row in free output".to_string()))?;
    let cols: Vec<&str> = row.split_whitespace().collect();
    let num = |i: usize| cols.get(i).and_then(|v| v.parse::<u64>().ok());
    match (num(2), num(1)) {
        (Some(used), Some(total)) => Ok((used, total)),
        _ => Err(invalid(format!("bad Mem: row: {row:?}"))),
    }
}

/// Pick status, balance and last farmed height out of `chia farm summary`.
pub fn parse_farm_summary(out: &str) -> io::Result<FarmStatus> {
    let field = |key: &str| {
        out.lines()
            .find_map(|l| l.trim().strip_prefix(key))
            .map(|v| v.trim().to_string())
    };
    let status = field("Farming status:")
        .ok_or_else(|| invalid("farm summary has no status".to_string()))?;
    Ok(FarmStatus {
        status,
        balance: field("Total chia farmed:").unwrap_or_else(|| "?".to_string()),
        height: field("Last height farmed:").unwrap_or_else(|| "?".to_string()),
    })
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
