//! Argus daemon lifecycle: start, liveness polling, and shutdown.
//!
//! Liveness is decided by whoever owns the listening port, so a daemon that
//! was already up before this run is detected and reused instead of being
//! started a second time.

use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{ArgusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Result of a single non-blocking liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Liveness {
    pub running: bool,
    pub pid: Option<u32>,
}

impl Liveness {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn running(pid: Option<u32>) -> Self {
        Self { running: true, pid }
    }
}

pub trait LivenessProbe {
    /// Must return promptly; never waits for the daemon.
    fn probe(&self, port: u16) -> Liveness;
}

/// Treats the daemon as running when something accepts connections on the port.
pub struct PortProbe {
    connect_timeout: Duration,
}

impl Default for PortProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
        }
    }
}

impl LivenessProbe for PortProbe {
    fn probe(&self, port: u16) -> Liveness {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        if TcpStream::connect_timeout(&addr, self.connect_timeout).is_ok() {
            Liveness::running(get_port_holder(port))
        } else {
            Liveness::stopped()
        }
    }
}

/// PID of the process listening on `port`, if `lsof` can tell us.
fn get_port_holder(port: u16) -> Option<u32> {
    let output = Command::new("lsof")
        .args(["-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .stderr(Stdio::null())
        .output()
        .ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().next()?.trim().parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProcessHandle {
    pid: Option<u32>,
    port: u16,
    owned: bool,
}

impl CaptureProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this supervisor spawned the process.
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

/// What `stop` actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopAction {
    /// Termination request sent to the child we spawned.
    Signalled(u32),
    /// The daemon pre-existed; the configured shutdown command was run instead.
    ShutdownCommand,
    /// Our child had already exited.
    AlreadyExited,
}

pub struct ProcessSupervisor<P: LivenessProbe = PortProbe> {
    probe: P,
    state: ProcessState,
    child: Option<Child>,
    poll_interval: Duration,
    shutdown_command: Vec<String>,
    cancel: Arc<AtomicBool>,
}

impl ProcessSupervisor<PortProbe> {
    pub fn new(poll_interval: Duration, shutdown_command: Vec<String>, cancel: Arc<AtomicBool>) -> Self {
        Self::with_probe(PortProbe::default(), poll_interval, shutdown_command, cancel)
    }
}

impl<P: LivenessProbe> ProcessSupervisor<P> {
    pub fn with_probe(
        probe: P,
        poll_interval: Duration,
        shutdown_command: Vec<String>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            probe,
            state: ProcessState::NotStarted,
            child: None,
            poll_interval,
            shutdown_command,
            cancel,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Launches `argus -i <interface> -P <port>` unless something already owns the port.
    ///
    /// Returns `(true, handle)` for a pre-existing daemon, in which case no
    /// process is spawned and the handle is not owned.
    pub fn start(&mut self, daemon_path: &Path, interface: &str, port: u16) -> Result<(bool, CaptureProcessHandle)> {
        if !matches!(self.state, ProcessState::NotStarted | ProcessState::Stopped) {
            return Err(ArgusError::ProcessStart(format!(
                "supervisor is already managing a daemon (state {:?})",
                self.state
            )));
        }

        let live = self.probe.probe(port);
        if live.running {
            self.state = ProcessState::Running;
            return Ok((
                true,
                CaptureProcessHandle {
                    pid: live.pid,
                    port,
                    owned: false,
                },
            ));
        }

        let child = Command::new(daemon_path)
            .arg("-i")
            .arg(interface)
            .arg("-P")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ArgusError::ProcessStart(format!("{}: {}", daemon_path.display(), e)))?;

        let pid = child.id();
        info!("Started {} (PID {}) on {} port {}", daemon_path.display(), pid, interface, port);

        self.child = Some(child);
        self.state = ProcessState::Starting;
        Ok((
            false,
            CaptureProcessHandle {
                pid: Some(pid),
                port,
                owned: true,
            },
        ))
    }

    pub fn is_running(&self, port: u16) -> (bool, Option<u32>) {
        let live = self.probe.probe(port);
        (live.running, live.pid)
    }

    /// Blocks in `poll_interval` steps until the port is owned.
    pub fn wait_until_running(&mut self, port: u16, timeout: Option<Duration>) -> Result<CaptureProcessHandle> {
        let started = Instant::now();
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(ArgusError::Cancelled("waiting for the argus server".to_string()));
            }

            info!("Waiting for the argus server ...");
            thread::sleep(self.poll_interval);

            if let Some(status) = self.reap_child() {
                // Usually a bind failure: another argus got the port first.
                let (running, pid) = self.is_running(port);
                if running {
                    self.state = ProcessState::Running;
                    warn!(
                        "argus exited ({}) but port {} is served by PID = {}; reusing it.",
                        status,
                        port,
                        display_pid(pid)
                    );
                    return Ok(CaptureProcessHandle { pid, port, owned: false });
                }
                self.state = ProcessState::Stopped;
                return Err(ArgusError::ProcessStart(format!(
                    "argus exited before listening on port {}: {}",
                    port, status
                )));
            }

            let (running, probed_pid) = self.is_running(port);
            if running {
                let owned = self.child.is_some();
                let pid = match &self.child {
                    Some(child) => Some(child.id()),
                    None => probed_pid,
                };
                self.state = ProcessState::Running;
                info!("The argus server is running PID = {}.", display_pid(pid));
                return Ok(CaptureProcessHandle { pid, port, owned });
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(ArgusError::Timeout(format!(
                        "argus did not start listening on port {} within {:?}",
                        port, limit
                    )));
                }
            }
        }
    }

    /// Asks the daemon to shut down without waiting for it.
    pub fn stop(&mut self, handle: &CaptureProcessHandle) -> Result<StopAction> {
        self.state = ProcessState::Stopping;

        if !handle.owned {
            run_shutdown_command(&self.shutdown_command)?;
            return Ok(StopAction::ShutdownCommand);
        }

        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return Ok(StopAction::AlreadyExited),
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!("argus already exited with {}", status);
            self.child = None;
            return Ok(StopAction::AlreadyExited);
        }

        let pid = child.id();
        terminate(child)?;
        info!("Sent termination request to argus (PID {})", pid);
        Ok(StopAction::Signalled(pid))
    }

    /// Blocks until the port is released, then drops the handle.
    pub fn wait_until_stopped(&mut self, handle: CaptureProcessHandle, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        loop {
            info!("Stopping the argus server ...");
            thread::sleep(self.poll_interval);

            self.reap_child();
            let (running, _) = self.is_running(handle.port);
            if !running && self.child.is_none() {
                self.state = ProcessState::Stopped;
                info!("The argus server is stopped.");
                return Ok(());
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(ArgusError::Timeout(format!(
                        "argus still alive on port {} after {:?}",
                        handle.port, limit
                    )));
                }
            }
        }
    }

    /// Collects the owned child if it has exited.
    fn reap_child(&mut self) -> Option<std::process::ExitStatus> {
        let status = match self.child.as_mut()?.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to poll argus child: {}", e);
                return None;
            }
        };
        self.child = None;
        Some(status)
    }
}

impl<P: LivenessProbe> Drop for ProcessSupervisor<P> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                warn!("Supervisor dropping, killing argus (PID {})", child.id());
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<()> {
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    child.kill()?;
    Ok(())
}

fn run_shutdown_command(command: &[String]) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ArgusError::Config("shutdown command is empty".to_string()))?;

    let status = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    info!("Ran `{}` to stop a daemon this run did not start ({})", command.join(" "), status);
    Ok(())
}
