//! `kubectl apply` driver.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{ApplyOutcome, ClusterApplier};

/// Default kubectl executable, resolved through `PATH`.
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// The cluster rejected a manifest.
#[derive(Debug, thiserror::Error)]
#[error("kubectl apply failed (exit status {}): {stderr}", .status.map_or("unknown".to_string(), |s| s.to_string()))]
pub struct ApplyError {
    /// Exit status of kubectl, if it exited normally.
    pub status: Option<i32>,
    /// kubectl's diagnostics, verbatim.
    pub stderr: String,
}

/// Builder for `kubectl apply` arguments.
#[derive(Debug, Clone, Default)]
pub struct KubectlCmdBuilder {
    context: Option<String>,
    namespace: Option<String>,
    field_manager: Option<String>,
    extra_args: Vec<String>,
}

impl KubectlCmdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the kubeconfig context.
    pub fn context(mut self, context: Option<impl Into<String>>) -> Self {
        self.context = context.map(Into::into);
        self
    }

    /// Set the namespace for resources that do not declare one.
    pub fn namespace(mut self, namespace: Option<impl Into<String>>) -> Self {
        self.namespace = namespace.map(Into::into);
        self
    }

    /// Set the field manager recorded on applied objects.
    pub fn field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = Some(manager.into());
        self
    }

    /// Add extra arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Build the arguments. The manifest is read from stdin.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec!["apply".to_string(), "-f".to_string(), "-".to_string()];

        if let Some(context) = self.context {
            cmd.push("--context".to_string());
            cmd.push(context);
        }

        if let Some(namespace) = self.namespace {
            cmd.push("--namespace".to_string());
            cmd.push(namespace);
        }

        if let Some(manager) = self.field_manager {
            cmd.push(format!("--field-manager={manager}"));
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

/// Cluster settings for `kubectl`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct KubectlApplier {
    /// kubectl executable.
    pub kubectl: String,
    /// kubeconfig context. The current context is used when unset.
    pub context: Option<String>,
    /// Default namespace.
    pub namespace: Option<String>,
    /// Extra `kubectl apply` arguments, e.g. `["--server-side"]`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for KubectlApplier {
    fn default() -> Self {
        Self {
            kubectl: DEFAULT_KUBECTL.to_string(),
            context: None,
            namespace: None,
            extra_args: Vec::new(),
        }
    }
}

impl KubectlApplier {
    fn args(&self) -> Vec<String> {
        KubectlCmdBuilder::new()
            .context(self.context.as_deref())
            .namespace(self.namespace.as_deref())
            .field_manager("shipwright")
            .extra_args(self.extra_args.iter().cloned())
            .build()
    }
}

impl ClusterApplier for KubectlApplier {
    async fn apply(&self, manifest: &str) -> Result<ApplyOutcome> {
        let args = self.args();
        tracing::debug!(kubectl = %self.kubectl, ?args, "Applying manifest");

        let mut child = Command::new(&self.kubectl)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is kubectl installed?", self.kubectl))?;

        let mut stdin = child.stdin.take().context("kubectl stdin is not piped")?;
        let write = async move {
            let written = stdin.write_all(manifest.as_bytes()).await;
            // Closing stdin ends the manifest.
            drop(stdin);
            written
        };

        // Feed stdin while draining stdout/stderr, or a full pipe blocks both sides.
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.context("Failed to wait for kubectl")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ApplyError {
                status: output.status.code(),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }
        // kubectl may exit before reading everything; its own error wins over the broken pipe.
        written.context("Failed to write manifest to kubectl")?;

        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::warn!("{}", line);
        }

        let outcome = ApplyOutcome::parse(&stdout);
        for resource in &outcome.resources {
            tracing::info!(resource = %resource.resource, action = %resource.action, "Applied");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_kubectl_cmd_builder() {
        let cmd = KubectlCmdBuilder::new()
            .context(Some("kind-dev"))
            .namespace(Some("apps"))
            .build();

        assert_eq!(
            cmd,
            vec!["apply", "-f", "-", "--context", "kind-dev", "--namespace", "apps"]
        );
    }

    #[test]
    fn test_kubectl_cmd_builder_defaults() {
        let cmd = KubectlCmdBuilder::new()
            .context(None::<String>)
            .field_manager("shipwright")
            .extra_args(["--server-side"])
            .build();

        assert_eq!(
            cmd,
            vec!["apply", "-f", "-", "--field-manager=shipwright", "--server-side"]
        );
    }

    #[test]
    fn test_apply_error_message() {
        let err = ApplyError {
            status: Some(1),
            stderr: "error: the server doesn't have a resource type \"deployments\"".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "kubectl apply failed (exit status 1): error: the server doesn't have a resource type \"deployments\""
        );
    }

    #[test]
    fn test_applier_args() {
        let applier = KubectlApplier {
            context: Some("kind-dev".to_string()),
            extra_args: vec!["--server-side".to_string()],
            ..Default::default()
        };
        assert_eq!(
            applier.args(),
            vec![
                "apply",
                "-f",
                "-",
                "--context",
                "kind-dev",
                "--field-manager=shipwright",
                "--server-side"
            ]
        );
    }

    /// Write an executable stand-in for kubectl.
    #[cfg(unix)]
    fn fake_kubectl(dir: &TempDir, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("kubectl");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_output_does_not_block() {
        let dir = TempDir::new("shipwright-kubectl").unwrap();
        // Echoes the manifest back, so output fills the pipe while stdin is still being written.
        let applier = KubectlApplier {
            kubectl: fake_kubectl(&dir, "cat"),
            ..Default::default()
        };

        let count = 20_000;
        let manifest: String = (0..count)
            .map(|i| format!("deployment.apps/application-api-{i} configured\n"))
            .collect();
        assert!(manifest.len() > 512 * 1024);

        let outcome = tokio::time::timeout(Duration::from_secs(30), applier.apply(&manifest))
            .await
            .expect("kubectl apply blocked")
            .unwrap();
        assert_eq!(outcome.resources.len(), count);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubectl_status_and_stderr() {
        let dir = TempDir::new("shipwright-kubectl").unwrap();
        let applier = KubectlApplier {
            kubectl: fake_kubectl(&dir, "cat > /dev/null\necho 'error: forbidden' >&2\nexit 3"),
            ..Default::default()
        };

        let err = applier.apply("kind: Deployment\n").await.unwrap_err();
        let err = err.downcast::<ApplyError>().unwrap();
        assert_eq!(err.status, Some(3));
        assert_eq!(err.stderr, "error: forbidden");
    }

    #[tokio::test]
    async fn test_missing_kubectl_fails() {
        let applier = KubectlApplier {
            kubectl: "/nonexistent/kubectl".to_string(),
            ..Default::default()
        };
        let err = applier.apply("apiVersion: v1\n").await.unwrap_err();
        assert!(err.to_string().contains("Failed to execute"));
    }
}
