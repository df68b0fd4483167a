//! Launchers backed by real processes.

use super::{LaunchError, LaunchHandle, LaunchRequest, LineStream, TunnelLauncher};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use tk_common::ProcessId;
use tk_config::TunnelSettings;
use tracing::{debug, info};

/// Runs the tunnel binary directly and streams its stdout and stderr.
#[derive(Debug, Clone)]
pub struct BinaryLauncher {
    settings: TunnelSettings,
}

impl BinaryLauncher {
    pub fn new(settings: TunnelSettings) -> Self {
        Self { settings }
    }
}

impl TunnelLauncher for BinaryLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        let binary = &self.settings.tunnel_binary;
        let args = self.settings.args_for(&request.local_address);
        debug!(binary = %binary, args = ?args, "spawning tunnel binary");

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LaunchError::from_spawn(binary, e))?;

        info!(pid = child.id(), name = %request.name, "tunnel binary started");
        let mut sources: Vec<Box<dyn Read + Send>> = Vec::new();
        if let Some(out) = child.stdout.take() {
            sources.push(Box::new(out));
        }
        if let Some(err) = child.stderr.take() {
            sources.push(Box::new(err));
        }
        let lines = merge_lines(sources);
        Ok(LaunchHandle::with_child(child, lines))
    }
}

/// Interleave lines from several readers; ends when all reach EOF.
///
/// The consumer must keep reading until the stream ends, or the child
/// blocks on a full pipe.
pub fn merge_lines(sources: Vec<Box<dyn Read + Send>>) -> LineStream {
    let (tx, rx) = mpsc::channel();
    for source in sources {
        let tx = tx.clone();
        thread::spawn(move || {
            for line in BufReader::new(source).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
    Box::new(rx.into_iter())
}

/// Starts a detached `supervise` process of this executable.
///
/// The supervisor owns the tunnel binary, records the public address when
/// it appears and outlives the invocation that started it. Its pid is what
/// the registry records.
#[derive(Debug, Clone)]
pub struct SupervisorLauncher {
    program: PathBuf,
    registry_path: PathBuf,
    config_path: Option<PathBuf>,
}

impl SupervisorLauncher {
    pub fn new(program: PathBuf, registry_path: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            registry_path,
            config_path,
        }
    }

    /// Supervisor running the current executable.
    pub fn current_exe(
        registry_path: PathBuf,
        config_path: Option<PathBuf>,
    ) -> Result<Self, LaunchError> {
        let program = std::env::current_exe().map_err(LaunchError::CurrentExe)?;
        Ok(Self::new(program, registry_path, config_path))
    }

    fn command(&self, request: &LaunchRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("supervise")
            .arg("--name")
            .arg(&request.name)
            .arg("--local-address")
            .arg(&request.local_address)
            .arg("--registry")
            .arg(&self.registry_path);
        if let Some(config) = &self.config_path {
            cmd.arg("--config").arg(config);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group: a Ctrl-C in the starting shell must not reach it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

impl TunnelLauncher for SupervisorLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        let program = self.program.display().to_string();
        let child = self
            .command(request)
            .spawn()
            .map_err(|e| LaunchError::from_spawn(&program, e))?;
        let pid = ProcessId(child.id());
        info!(pid = pid.0, name = %request.name, "supervisor started");

        // The supervisor reports discovery through the registry file.
        Ok(LaunchHandle::new(Some(pid), Box::new(std::iter::empty())))
    }
}
