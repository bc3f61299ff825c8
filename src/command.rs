// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Shell command execution.
//!
//! Every child is spawned with `kill_on_drop`, so a lookup that times out or is
//! abandoned never leaves a process behind.

use nix::unistd::{Uid, User};
use std::io;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Run `cmd` through `sh -c` and return its trimmed stdout.
pub async fn run_shell(cmd: &str) -> io::Result<String> {
    let output = shell(cmd).output().await?;
    stdout_of(cmd, output)
}

/// Run `cmd` through `sh -c`, ignoring its output. Fails on a non-zero exit.
pub async fn check_call(cmd: &str) -> io::Result<()> {
    run_shell(cmd).await.map(|_| ())
}

/// Identity a user-scoped command runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    pub home: PathBuf,
}

impl UserIdentity {
    /// Look up `uid` in the passwd database.
    pub fn lookup(uid: u32, gid: u32) -> io::Result<Self> {
        let user = User::from_uid(Uid::from_raw(uid))
            .map_err(io::Error::from)?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no passwd entry for uid {uid}"))
            })?;
        Ok(Self {
            uid,
            gid,
            name: user.name,
            home: user.dir,
        })
    }

    /// Run `cmd` as this user from their home directory, giving up after `timeout`.
    ///
    /// The uid/gid switch happens in the child before exec, and only when the
    /// daemon runs as root; otherwise the command runs as the daemon's own user.
    pub async fn run_shell(&self, cmd: &str, timeout: Duration) -> io::Result<String> {
        let mut command = shell(cmd);
        command.current_dir(&self.home);

        let me = Uid::effective();
        if me.is_root() {
            command.gid(self.gid);
            command.uid(self.uid);
        } else if me.as_raw() != self.uid {
            log::warn!(
                "Not running as root, '{}' runs as uid {} instead of {}",
                cmd,
                me,
                self.uid
            );
        }

        // Dropping the output future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("'{cmd}' did not finish within {}s", timeout.as_secs()),
                )
            })??;
        stdout_of(cmd, output)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn shell(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd).kill_on_drop(true);
    command
}

fn stdout_of(cmd: &str, output: Output) -> io::Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(io::Error::other(format!(
            "'{cmd}' failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
