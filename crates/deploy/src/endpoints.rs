//! Externally reachable endpoints of the deployed service.
//!
//! URLs are derived from the workspace identifier and a port convention only.
//! Nothing here checks that they answer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default domain of forwarded workspace ports.
pub const DEFAULT_DOMAIN: &str = "app.github.dev";

/// A named port exposed through the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortConvention {
    /// Human readable name, e.g. `Application`.
    pub name: String,
    pub port: u16,
}

impl PortConvention {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Reporting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Workspace or session identifier, the host prefix of every URL.
    pub workspace: Option<String>,
    /// Domain the forwarded ports live under.
    pub domain: String,
    /// Ports to report.
    pub endpoints: Vec<PortConvention>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            domain: DEFAULT_DOMAIN.to_string(),
            endpoints: vec![
                PortConvention::new("Dev Portal", 7007),
                PortConvention::new("Application", 8080),
            ],
        }
    }
}

/// A reported endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: Url,
}

impl ReportConfig {
    /// Build the endpoint URLs, `https://<workspace>-<port>.<domain>/`.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        if self.endpoints.is_empty() {
            return Ok(Vec::new());
        }

        let workspace = self
            .workspace
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .context("A workspace identifier is required to report endpoints")?;

        self.endpoints
            .iter()
            .map(|convention| {
                let url = Self::build_url(workspace, convention.port, &self.domain)?;
                Ok(Endpoint {
                    name: convention.name.clone(),
                    url,
                })
            })
            .collect()
    }

    /// Build the URL of one forwarded port.
    pub fn build_url(workspace: &str, port: u16, domain: &str) -> Result<Url> {
        Url::parse(&format!(
            "https://{}-{}.{}/",
            workspace,
            port,
            domain.trim_matches('.')
        ))
        .with_context(|| format!("Failed to build endpoint URL for workspace '{workspace}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(workspace: &str) -> ReportConfig {
        ReportConfig {
            workspace: Some(workspace.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_endpoints() {
        let endpoints = config("fluffy-space-guide-x5g7").endpoints().unwrap();

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].name, "Dev Portal");
        assert_eq!(
            endpoints[0].url.as_str(),
            "https://fluffy-space-guide-x5g7-7007.app.github.dev/"
        );
        assert_eq!(endpoints[1].name, "Application");
        assert_eq!(
            endpoints[1].url.as_str(),
            "https://fluffy-space-guide-x5g7-8080.app.github.dev/"
        );
    }

    #[test]
    fn test_endpoints_deterministic() {
        let a = config("ws-1").endpoints().unwrap();
        let b = config("ws-1").endpoints().unwrap();
        let c = config("ws-2").endpoints().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_workspace_required() {
        assert!(ReportConfig::default().endpoints().is_err());
        assert!(config("  ").endpoints().is_err());

        let none = ReportConfig {
            endpoints: vec![],
            ..Default::default()
        };
        assert!(none.endpoints().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_workspace() {
        assert!(config("bad host/name").endpoints().is_err());
    }
}
