//! Docker isolation backend
//!
//! Drives the `docker` CLI through `tokio::process`. One backend value is
//! created at process start with [`DockerBackend::connect`]; every container
//! it creates carries a `mend.instance` label so [`IsolationBackend::shutdown`]
//! can sweep anything left behind.

use crate::backend::{EnvironmentId, EnvironmentSpec, EnvironmentStatus, IsolationBackend};
use crate::config::SandboxConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Label key identifying the owning backend instance
pub const INSTANCE_LABEL: &str = "mend.instance";

/// Docker CLI backend
#[derive(Debug, Clone)]
pub struct DockerBackend {
    binary: String,
    instance: String,
}

impl DockerBackend {
    /// Connect to the local daemon and verify it answers
    pub async fn connect(config: &SandboxConfig) -> Result<Self, BackendError> {
        let backend = Self::with_binary(config.docker_binary.clone());
        let version = backend.server_version().await?;
        info!(
            version = %version,
            instance = %backend.instance,
            "connected to docker daemon"
        );
        Ok(backend)
    }

    /// Backend without a connectivity check
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            instance: Ulid::new().to_string(),
        }
    }

    /// Instance label value
    #[inline]
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    async fn server_version(&self) -> Result<String, BackendError> {
        let args = ["version", "--format", "{{.Server.Version}}"].map(String::from);
        self.run(&args).await.map(|out| out.trim().to_string())
    }

    async fn run(&self, args: &[String]) -> Result<String, BackendError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    BackendError::Unavailable(format!("`{}` not found on PATH", self.binary))
                }
                _ => BackendError::from(e),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let command = format!("{} {}", self.binary, args.first().map_or("", String::as_str));
        if is_missing(&stderr) {
            return Err(BackendError::NotFound(stderr));
        }
        if stderr.contains("Cannot connect to the Docker daemon") {
            return Err(BackendError::Unavailable(stderr));
        }
        Err(BackendError::Command {
            command,
            status: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// Arguments for `docker create`
#[must_use]
pub fn create_args(spec: &EnvironmentSpec, instance: &str) -> Vec<String> {
    let mut args = vec!["create".to_string()];

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("--label".to_string());
    args.push(format!("{INSTANCE_LABEL}={instance}"));

    if spec.network_disabled {
        args.extend(["--network", "none"].map(String::from));
    }

    let memory = format!("{}m", spec.limits.memory_mb);
    args.extend(["--memory".to_string(), memory.clone()]);
    args.extend(["--memory-swap".to_string(), memory]);
    args.extend(["--cpus".to_string(), spec.limits.cpu_cores.to_string()]);
    args.extend(["--pids-limit".to_string(), spec.limits.pids_limit.to_string()]);

    args.extend(["--user".to_string(), spec.user.clone()]);
    if spec.no_new_privileges {
        args.extend(["--security-opt", "no-new-privileges"].map(String::from));
    }
    if spec.drop_all_capabilities {
        args.extend(["--cap-drop", "ALL"].map(String::from));
    }
    if spec.read_only_root {
        args.push("--read-only".to_string());
    }
    for tmpfs in &spec.tmpfs {
        args.extend(["--tmpfs".to_string(), tmpfs.clone()]);
    }
    for mount in &spec.mounts {
        let mode = if mount.read_only { ":ro" } else { "" };
        args.push("-v".to_string());
        args.push(format!("{}:{}{mode}", mount.source.display(), mount.target));
    }
    args.extend(["-w".to_string(), spec.working_dir.clone()]);
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Parse `{{.State.Status}}|{{.State.ExitCode}}`
pub fn parse_status(raw: &str) -> Result<EnvironmentStatus, BackendError> {
    let raw = raw.trim();
    let (state, code) = raw.split_once('|').unwrap_or((raw, ""));
    let code = code.trim().parse::<i64>().ok();

    match state.trim() {
        "created" => Ok(EnvironmentStatus::Created),
        "running" | "restarting" | "paused" => Ok(EnvironmentStatus::Running),
        "exited" => Ok(EnvironmentStatus::Exited { code }),
        "dead" | "removing" => Ok(EnvironmentStatus::Dead),
        other => Err(BackendError::Protocol(format!("unknown container state `{other}`"))),
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create(&self, spec: &EnvironmentSpec) -> Result<EnvironmentId, BackendError> {
        let out = self.run(&create_args(spec, &self.instance)).await?;
        let id = out.trim();
        if id.is_empty() {
            return Err(BackendError::Protocol("create returned no container id".to_string()));
        }
        let id = EnvironmentId::new(id);
        debug!(environment = %id.short(), image = %spec.image, "container created");
        Ok(id)
    }

    async fn start(&self, id: &EnvironmentId) -> Result<(), BackendError> {
        self.run(&["start".to_string(), id.to_string()]).await.map(|_| ())
    }

    async fn poll(&self, id: &EnvironmentId) -> Result<EnvironmentStatus, BackendError> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}|{{.State.ExitCode}}".to_string(),
            id.to_string(),
        ];
        parse_status(&self.run(&args).await?)
    }

    async fn kill(&self, id: &EnvironmentId) -> Result<(), BackendError> {
        match self.run(&["kill".to_string(), id.to_string()]).await {
            Ok(_) => Ok(()),
            // Exited on its own between the last poll and the kill
            Err(BackendError::Command { stderr, .. }) if stderr.contains("is not running") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, id: &EnvironmentId) -> Result<(), BackendError> {
        match self.run(&["rm".to_string(), "-f".to_string(), id.to_string()]).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn logs(&self, id: &EnvironmentId) -> Result<String, BackendError> {
        let output = Command::new(&self.binary)
            .args(["logs", id.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            if is_missing(&stderr) {
                return Err(BackendError::NotFound(id.to_string()));
            }
            return Err(BackendError::Command {
                command: format!("{} logs", self.binary),
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        Ok(text)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.server_version().await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        let args = [
            "ps".to_string(),
            "-aq".to_string(),
            "--filter".to_string(),
            format!("label={INSTANCE_LABEL}={}", self.instance),
        ];
        let leftover: Vec<String> = self
            .run(&args)
            .await?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        if leftover.is_empty() {
            info!("docker backend shut down cleanly");
            return Ok(());
        }

        warn!(count = leftover.len(), "removing leftover sandbox containers");
        for id in leftover {
            if let Err(e) = self.remove(&EnvironmentId::new(id.clone())).await {
                warn!(environment = %id, error = %e, "failed to remove leftover container");
            }
        }
        Ok(())
    }
}
