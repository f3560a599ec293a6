//! Process control surface.
//!
//! The engine talks to the host's service manager through the
//! `ServiceControl` trait so tests can substitute a mock. The real
//! implementation drives a systemd unit, with every invocation bounded by
//! a 30 s timeout (the child is killed on expiry).

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

/// Timeout for a single service-manager invocation.
const SERVICE_TIMEOUT_SECS: u64 = 30;

/// Stop, start, and query the host process.
pub trait ServiceControl: Send + Sync {
    /// Stop the unit. Stopping an already-stopped unit is success.
    fn stop(&self) -> bool;
    /// Start the unit.
    fn start(&self) -> bool;
    /// Whether the unit currently reports a running state.
    fn is_running(&self) -> bool;
}

/// systemd-backed implementation addressing a fixed unit name.
pub struct SystemdControl {
    unit: String,
    timeout: Duration,
}

impl SystemdControl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            timeout: Duration::from_secs(SERVICE_TIMEOUT_SECS),
        }
    }

    fn systemctl(&self, verb: &str) -> Option<(ExitStatus, String, String)> {
        match run_with_timeout("systemctl", &[verb, &self.unit], self.timeout) {
            Ok(result) => Some(result),
            Err(e) => {
                error!("systemctl {} {} failed to run: {}", verb, self.unit, e);
                None
            }
        }
    }
}

impl ServiceControl for SystemdControl {
    fn stop(&self) -> bool {
        match self.systemctl("stop") {
            Some((status, _, stderr)) => {
                if status.success() || stderr.to_lowercase().contains("not loaded") {
                    info!("Service {} stopped", self.unit);
                    true
                } else {
                    warn!("Failed to stop {}: {}", self.unit, stderr.trim());
                    false
                }
            }
            None => false,
        }
    }

    fn start(&self) -> bool {
        match self.systemctl("start") {
            Some((status, _, stderr)) => {
                if status.success() {
                    info!("Service {} started", self.unit);
                    true
                } else {
                    warn!("Failed to start {}: {}", self.unit, stderr.trim());
                    false
                }
            }
            None => false,
        }
    }

    fn is_running(&self) -> bool {
        match self.systemctl("is-active") {
            Some((status, stdout, _)) => status.success() && stdout.trim() == "active",
            None => false,
        }
    }
}

/// Run a command with piped output, killing it if the deadline passes.
fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> std::io::Result<(ExitStatus, String, String)> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                warn!("{} {:?} timed out after {:?}, killing", program, args, timeout);
                let _ = child.kill();
                break child.wait()?;
            }
            None => std::thread::sleep(Duration::from_millis(100)),
        }
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }
    Ok((status, stdout, stderr))
}
