//! Freeing the dev-server port from stale processes.

use std::io::ErrorKind;
use std::net::TcpListener;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::io::process::run_command_with_timeout;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const RELEASE_ATTEMPTS: u32 = 30;
const RELEASE_POLL: Duration = Duration::from_millis(100);

/// Make sure `bind:port` can be bound, killing whatever listens there.
///
/// Returns the PIDs that were evicted. Failing to evict, or the port staying
/// busy afterwards, is an error.
pub fn ensure_port_free(bind: &str, port: u16) -> Result<Vec<u32>> {
    if port_is_free(bind, port)? {
        debug!(port, "port is free");
        return Ok(Vec::new());
    }

    let pids = listening_pids(port)?;
    if pids.is_empty() {
        bail!("port {port} is in use but no listening process was found");
    }
    for &pid in &pids {
        warn!(pid, port, "evicting process bound to dev-server port");
        kill_pid(pid)?;
    }

    for _ in 0..RELEASE_ATTEMPTS {
        if port_is_free(bind, port)? {
            info!(port, evicted = ?pids, "port released");
            return Ok(pids);
        }
        thread::sleep(RELEASE_POLL);
    }
    bail!("port {port} still in use after evicting {pids:?}")
}

fn port_is_free(bind: &str, port: u16) -> Result<bool> {
    match TcpListener::bind((bind, port)) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AddrInUse => Ok(false),
        Err(err) => Err(err).with_context(|| format!("probe {bind}:{port}")),
    }
}

fn listening_pids(port: u16) -> Result<Vec<u32>> {
    let mut cmd = Command::new("lsof");
    cmd.arg("-t")
        .arg(format!("-iTCP:{port}"))
        .arg("-sTCP:LISTEN");
    let output =
        run_command_with_timeout(cmd, COMMAND_TIMEOUT, 64 * 1024).context("look up port owner")?;
    // lsof exits 1 when nothing matches.
    if output.timed_out || !(output.status.success() || output.status.code() == Some(1)) {
        output.ensure_success("lsof")?;
    }
    Ok(parse_pids(&output.stdout_text(), std::process::id()))
}

fn kill_pid(pid: u32) -> Result<()> {
    let mut cmd = Command::new("kill");
    cmd.arg("-9").arg(pid.to_string());
    run_command_with_timeout(cmd, COMMAND_TIMEOUT, 64 * 1024)
        .with_context(|| format!("kill {pid}"))?
        .ensure_success(&format!("kill {pid}"))
}

/// Parse one PID per line, skipping blanks, duplicates and our own process.
fn parse_pids(stdout: &str, own_pid: u32) -> Vec<u32> {
    let mut pids = Vec::new();
    for pid in stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
    {
        if pid != own_pid && !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}
