//! Structured environment contract
//!
//! A candidate never becomes part of executed source text. The executor
//! writes a workspace directory holding the payload as a plain file, the
//! dependency manifest, the test battery and a constant harness, then mounts
//! it read-only into the environment:
//!
//! ```text
//! /workspace/harness.py               constant entrypoint
//! /workspace/requirements.txt         dependency manifest
//! /workspace/payload/candidate.py     payload, verbatim
//! /workspace/tests/test_candidate.py  default battery or override
//! ```

use crate::backend::{EnvironmentSpec, Mount};
use crate::config::SandboxConfig;
use crate::executor::ExecutionRequest;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Harness entrypoint copied into every workspace
pub const HARNESS_SOURCE: &str = include_str!("../assets/harness.py");

/// Validation battery used when a candidate brings no override
pub const DEFAULT_TEST_BATTERY: &str = include_str!("../assets/test_battery.py");

/// Mount point of the workspace inside the environment
pub const WORKSPACE_TARGET: &str = "/workspace";

/// Writable scratch area: dependency installs, bytecode, HOME
pub const SCRATCH_TMPFS: &str = "/tmp:rw,exec,size=256m";

/// Tells the harness installs cannot reach a package index
pub const NETWORK_ENV: &str = "MEND_SANDBOX_NETWORK";

/// Materialized workspace for one execution attempt
///
/// The directory is deleted when the contract is dropped.
#[derive(Debug)]
pub struct EnvironmentContract {
    dir: TempDir,
    requirements: Vec<String>,
}

impl EnvironmentContract {
    /// Write the workspace for a request
    pub async fn materialize(
        request: &ExecutionRequest,
        default_requirements: &[String],
    ) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("mend-sandbox-").tempdir()?;
        let root = dir.path();

        let requirements: Vec<String> = if request.requirements.is_empty() {
            default_requirements.to_vec()
        } else {
            request.requirements.iter().map(|r| r.trim().to_string()).collect()
        };

        tokio::fs::create_dir(root.join("payload")).await?;
        tokio::fs::create_dir(root.join("tests")).await?;

        tokio::fs::write(root.join("harness.py"), HARNESS_SOURCE).await?;
        tokio::fs::write(
            root.join("payload").join("candidate.py"),
            request.payload.as_deref().unwrap_or_default(),
        )
        .await?;
        tokio::fs::write(root.join("requirements.txt"), manifest(&requirements)).await?;
        tokio::fs::write(
            root.join("tests").join("test_candidate.py"),
            request.test_overrides.as_deref().unwrap_or(DEFAULT_TEST_BATTERY),
        )
        .await?;

        make_readable(root).await?;

        tracing::debug!(
            workspace = %root.display(),
            requirements = requirements.len(),
            override_tests = request.test_overrides.is_some(),
            "materialized environment contract"
        );

        Ok(Self { dir, requirements })
    }

    /// Host path of the workspace
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Manifest written to the workspace
    #[inline]
    #[must_use]
    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    /// Environment description for the backend
    #[must_use]
    pub fn environment_spec(&self, config: &SandboxConfig) -> EnvironmentSpec {
        EnvironmentSpec {
            image: config.image.clone(),
            command: vec![
                "python".to_string(),
                format!("{WORKSPACE_TARGET}/harness.py"),
            ],
            working_dir: WORKSPACE_TARGET.to_string(),
            mounts: vec![Mount {
                source: self.dir.path().to_path_buf(),
                target: WORKSPACE_TARGET.to_string(),
                read_only: true,
            }],
            tmpfs: vec![SCRATCH_TMPFS.to_string()],
            limits: config.limits,
            user: config.user.clone(),
            env: vec![
                ("HOME".to_string(), "/tmp".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                (NETWORK_ENV.to_string(), "none".to_string()),
            ],
            labels: vec![("mend.managed".to_string(), "true".to_string())],
            network_disabled: true,
            read_only_root: true,
            no_new_privileges: true,
            drop_all_capabilities: true,
        }
    }
}

fn manifest(requirements: &[String]) -> String {
    let mut text = requirements.join("\n");
    text.push('\n');
    text
}

/// The environment runs as an unprivileged user; the workspace must be
/// world-readable while staying read-only.
#[cfg(unix)]
async fn make_readable(root: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dirs: [PathBuf; 3] = [root.to_path_buf(), root.join("payload"), root.join("tests")];
    for dir in &dirs {
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).await?;
    }
    for file in [
        root.join("harness.py"),
        root.join("requirements.txt"),
        root.join("payload").join("candidate.py"),
        root.join("tests").join("test_candidate.py"),
    ] {
        tokio::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn make_readable(_root: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn payload_is_written_verbatim() {
        let payload = "print('{}'.format(1))\n# \"\"\" ''' {payload}\n";
        let request = ExecutionRequest::new(Some(payload.to_string()));
        let contract = EnvironmentContract::materialize(&request, &["pytest".to_string()])
            .await
            .unwrap();

        let written =
            std::fs::read_to_string(contract.path().join("payload/candidate.py")).unwrap();
        assert_eq!(written, payload);

        let harness = std::fs::read_to_string(contract.path().join("harness.py")).unwrap();
        assert_eq!(harness, HARNESS_SOURCE);
        assert!(!harness.contains(payload));
    }

    #[tokio::test]
    async fn default_manifest_and_battery() {
        let request = ExecutionRequest::new(None);
        let contract = EnvironmentContract::materialize(&request, &["pytest".to_string()])
            .await
            .unwrap();

        assert_eq!(contract.requirements(), ["pytest".to_string()]);
        let manifest = std::fs::read_to_string(contract.path().join("requirements.txt")).unwrap();
        assert_eq!(manifest, "pytest\n");
        let tests =
            std::fs::read_to_string(contract.path().join("tests/test_candidate.py")).unwrap();
        assert_eq!(tests, DEFAULT_TEST_BATTERY);
    }

    #[tokio::test]
    async fn declared_manifest_and_override() {
        let request = ExecutionRequest::new(Some("x = 1".to_string()))
            .with_requirements(vec![" requests==2.31.0 ".to_string(), "pytest".to_string()])
            .with_test_overrides("def test_ok():\n    assert True\n");
        let contract = EnvironmentContract::materialize(&request, &[]).await.unwrap();

        let manifest = std::fs::read_to_string(contract.path().join("requirements.txt")).unwrap();
        assert_eq!(manifest, "requests==2.31.0\npytest\n");
        let tests =
            std::fs::read_to_string(contract.path().join("tests/test_candidate.py")).unwrap();
        assert!(tests.contains("test_ok"));
    }

    #[tokio::test]
    async fn workspace_removed_on_drop() {
        let contract = EnvironmentContract::materialize(&ExecutionRequest::new(None), &[])
            .await
            .unwrap();
        let path = contract.path().to_path_buf();
        assert!(path.exists());
        drop(contract);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn spec_is_locked_down() {
        let contract = EnvironmentContract::materialize(&ExecutionRequest::new(None), &[])
            .await
            .unwrap();
        let spec = contract.environment_spec(&SandboxConfig::default());

        assert!(spec.network_disabled);
        assert!(spec
            .env
            .contains(&(NETWORK_ENV.to_string(), "none".to_string())));
        assert!(spec.read_only_root);
        assert!(spec.no_new_privileges);
        assert!(spec.drop_all_capabilities);
        assert_eq!(spec.user, "nobody");
        assert_eq!(spec.limits.memory_mb, 512);
        assert_eq!(spec.mounts.len(), 1);
        assert!(spec.mounts[0].read_only);
        assert_eq!(spec.mounts[0].target, WORKSPACE_TARGET);
        assert_eq!(spec.command, vec!["python", "/workspace/harness.py"]);
    }
}
