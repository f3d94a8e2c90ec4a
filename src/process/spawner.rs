use crate::config::ServerLaunchSpec;
use crate::error::{PtError, Result};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::{Child, Command};

pub const ENV_MANAGED_TRANSPORT_VER: &str = "TOR_PT_MANAGED_TRANSPORT_VER";
pub const ENV_STATE_LOCATION: &str = "TOR_PT_STATE_LOCATION";
pub const ENV_EXIT_ON_STDIN_CLOSE: &str = "TOR_PT_EXIT_ON_STDIN_CLOSE";
pub const ENV_ORPORT: &str = "TOR_PT_ORPORT";
pub const ENV_SERVER_TRANSPORTS: &str = "TOR_PT_SERVER_TRANSPORTS";
pub const ENV_SERVER_BINDADDR: &str = "TOR_PT_SERVER_BINDADDR";
pub const ENV_SERVER_TRANSPORT_OPTIONS: &str = "TOR_PT_SERVER_TRANSPORT_OPTIONS";

/// Metadata returned when spawning the PT
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle, with stdin, stdout and stderr piped
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Environment variables that describe the server transports to the PT
///
/// `TOR_PT_SERVER_TRANSPORT_OPTIONS` is only present when at least one
/// transport has options. Option keys and values are passed verbatim; any
/// escaping they need is the configuration author's job.
pub fn server_environment(spec: &ServerLaunchSpec) -> BTreeMap<&'static str, String> {
    let mut env = BTreeMap::new();

    env.insert(ENV_MANAGED_TRANSPORT_VER, "1".to_string());
    env.insert(
        ENV_STATE_LOCATION,
        spec.state_directory.to_string_lossy().into_owned(),
    );
    env.insert(ENV_EXIT_ON_STDIN_CLOSE, "1".to_string());
    env.insert(ENV_ORPORT, spec.forward_target.clone());

    let names: Vec<&str> = spec.transport_names().collect();
    env.insert(ENV_SERVER_TRANSPORTS, names.join(","));

    let bind_addresses: Vec<String> = spec
        .transports
        .iter()
        .map(|t| format!("{}-{}", t.name, t.bind_address))
        .collect();
    env.insert(ENV_SERVER_BINDADDR, bind_addresses.join(","));

    let options: Vec<String> = spec
        .transports
        .iter()
        .flat_map(|t| {
            t.options
                .iter()
                .map(move |(key, value)| format!("{}:{}={}", t.name, key, value))
        })
        .collect();
    if !options.is_empty() {
        env.insert(ENV_SERVER_TRANSPORT_OPTIONS, options.join(";"));
    }

    env
}

/// Build the command that launches the PT
///
/// The PT inherits this process's environment plus the server transport
/// variables. All three standard streams are piped: stdout carries the
/// readiness lines, and closing stdin asks the PT to exit.
pub fn build_command(spec: &ServerLaunchSpec) -> Command {
    let mut command = Command::new(&spec.executable);

    if !spec.executable_args.is_empty() {
        command.args(&spec.executable_args);
    }

    let env = server_environment(spec);
    if !env.contains_key(ENV_SERVER_TRANSPORT_OPTIONS) {
        command.env_remove(ENV_SERVER_TRANSPORT_OPTIONS);
    }
    command.envs(env);

    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    command
}

/// Spawn the PT executable described by the launch spec
///
/// # Returns
/// * `Ok(SpawnedProcess)` - The PT was spawned (it may not be ready yet)
/// * `Err(PtError::SpawnError)` - The executable is missing or could not be run
pub fn spawn_pt(spec: &ServerLaunchSpec) -> Result<SpawnedProcess> {
    // Bare names are resolved through PATH by the OS
    if spec.executable.components().count() > 1 && !spec.executable.exists() {
        return Err(PtError::SpawnError(format!(
            "Executable does not exist: {}",
            spec.executable.display()
        )));
    }

    let child = build_command(spec).spawn().map_err(|e| {
        PtError::SpawnError(format!(
            "Failed to spawn '{}': {}",
            spec.executable.display(),
            e
        ))
    })?;

    let pid = child.id().ok_or_else(|| {
        PtError::SpawnError(format!(
            "Failed to get PID for '{}'",
            spec.executable.display()
        ))
    })?;

    Ok(SpawnedProcess { child, pid })
}
