//! Two-stage runtime image definition.
//!
//! The builder stage compiles the service with a pinned toolchain. The runtime
//! stage starts from a pinned minimal OS, installs the TLS runtime closure and
//! receives nothing from the builder but the compiled artifact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ImageRef;

/// Default builder image (Rust toolchain, pinned).
pub const DEFAULT_BUILDER_IMAGE: &str = "rust:1.85-bookworm";
/// Default runtime base image (Debian 12, pinned).
pub const DEFAULT_RUNTIME_IMAGE: &str = "debian:12-slim";
/// Packages the artifact needs to make outbound TLS connections.
pub const DEFAULT_RUNTIME_PACKAGES: [&str; 2] = ["openssl", "ca-certificates"];
/// Package providing the CA bundle.
const CA_BUNDLE_PACKAGE: &str = "ca-certificates";
/// Package name prefixes that provide a TLS library.
const TLS_LIBRARY_PREFIXES: [&str; 2] = ["openssl", "libssl"];
/// Default name of the compiled service binary.
pub const DEFAULT_BINARY: &str = "application-api";

/// Name of the generated Dockerfile inside the build context.
pub const GENERATED_DOCKERFILE: &str = ".shipwright.Dockerfile";

/// Directory the binary is installed to in the runtime image.
const INSTALL_DIR: &str = "/usr/local/bin";

/// Specification of the runtime image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpec {
    /// Image of the build stage. Must be pinned.
    pub builder_image: String,
    /// Image of the runtime stage. Must be pinned.
    pub runtime_image: String,
    /// Packages installed in the runtime stage.
    pub runtime_packages: Vec<String>,
    /// Name of the executable produced by the build.
    pub binary: String,
    /// Build command run in the builder stage. Defaults to a cargo release build of `binary`.
    pub build_command: Option<String>,
    /// Working directory of the builder stage.
    pub workdir: String,
    /// Use this Dockerfile from the source tree instead of generating one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            builder_image: DEFAULT_BUILDER_IMAGE.to_string(),
            runtime_image: DEFAULT_RUNTIME_IMAGE.to_string(),
            runtime_packages: DEFAULT_RUNTIME_PACKAGES.map(String::from).to_vec(),
            binary: DEFAULT_BINARY.to_string(),
            build_command: None,
            workdir: "/usr/src/app".to_string(),
            dockerfile: None,
        }
    }
}

impl ImageSpec {
    /// Check that both stages use pinned base images and the artifact is named.
    pub fn validate(&self) -> Result<()> {
        for (stage, image) in [("builder", &self.builder_image), ("runtime", &self.runtime_image)] {
            let reference: ImageRef = image
                .parse()
                .with_context(|| format!("Invalid {stage} image '{image}'"))?;
            if !reference.is_pinned() {
                anyhow::bail!(
                    "The {stage} image '{image}' is not pinned. Use an explicit version tag or digest, never 'latest'"
                );
            }
        }

        if self.binary.is_empty() || self.binary.contains('/') {
            anyhow::bail!("Invalid binary name '{}'", self.binary);
        }

        if self.runtime_packages.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("Runtime package names must not be empty");
        }

        // A custom Dockerfile owns its runtime stage.
        if self.dockerfile.is_none() {
            self.validate_tls_closure()?;
        }

        Ok(())
    }

    /// The runtime stage needs a CA bundle and a TLS library for outbound TLS.
    fn validate_tls_closure(&self) -> Result<()> {
        let packages: Vec<&str> = self.runtime_packages.iter().map(|p| p.trim()).collect();

        if !packages.contains(&CA_BUNDLE_PACKAGE) {
            anyhow::bail!(
                "Runtime packages must include '{}', got [{}]",
                CA_BUNDLE_PACKAGE,
                packages.join(", ")
            );
        }

        if !packages
            .iter()
            .any(|p| TLS_LIBRARY_PREFIXES.iter().any(|prefix| p.starts_with(prefix)))
        {
            anyhow::bail!(
                "Runtime packages must include a TLS library (openssl or libssl*), got [{}]",
                packages.join(", ")
            );
        }

        Ok(())
    }

    /// The build command of the builder stage.
    pub fn build_command(&self) -> String {
        self.build_command
            .clone()
            .unwrap_or_else(|| format!("cargo build --release --locked --bin {}", self.binary))
    }

    /// Path of the compiled artifact inside the builder stage.
    pub fn artifact_path(&self) -> String {
        format!("{}/target/release/{}", self.workdir.trim_end_matches('/'), self.binary)
    }

    /// Path of the artifact inside the runtime image.
    pub fn installed_path(&self) -> String {
        format!("{}/{}", INSTALL_DIR, self.binary)
    }

    /// Render the multi-stage Dockerfile.
    pub fn dockerfile(&self) -> String {
        let mut lines = vec![
            format!("FROM {} AS builder", self.builder_image),
            format!("WORKDIR {}", self.workdir),
            "COPY . .".to_string(),
            format!("RUN {}", self.build_command()),
            String::new(),
            format!("FROM {}", self.runtime_image),
        ];

        if !self.runtime_packages.is_empty() {
            lines.push(format!(
                "RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*",
                self.runtime_packages.join(" ")
            ));
        }

        lines.push(format!(
            "COPY --from=builder {} {}",
            self.artifact_path(),
            self.installed_path()
        ));
        // Exec form: the binary is PID 1 and the container exits with it.
        lines.push(format!("CMD [\"{}\"]", self.installed_path()));

        let mut dockerfile = lines.join("\n");
        dockerfile.push('\n');
        dockerfile
    }
}
