//! Registry credentials.

use std::{collections::HashMap, path::PathBuf};

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use bollard::auth::DockerCredentials;
use serde::{Deserialize, Serialize};

/// Explicit registry credentials from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Path of the Docker CLI config file. Defaults to `~/.docker/config.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerConfigAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerConfigAuth {
    auth: Option<String>,
    identitytoken: Option<String>,
}

impl RegistryAuth {
    /// Resolve credentials for a registry host.
    ///
    /// Explicit username/password win. Otherwise the Docker CLI config file is
    /// consulted. `None` means anonymous push, which the registry may reject.
    pub fn credentials_for(&self, host: &str) -> Result<Option<DockerCredentials>> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Some(DockerCredentials {
                username: Some(username.clone()),
                password: Some(password.clone()),
                serveraddress: Some(host.to_string()),
                ..Default::default()
            }));
        }

        let Some(path) = self.docker_config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No Docker config file, pushing anonymously");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read Docker config {}", path.display()))?;
        let config: DockerConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse Docker config {}", path.display()))?;

        let Some(entry) = lookup_auth(&config.auths, host) else {
            tracing::debug!(host, "No stored credentials for registry");
            return Ok(None);
        };

        if let Some(token) = &entry.identitytoken {
            return Ok(Some(DockerCredentials {
                identitytoken: Some(token.clone()),
                serveraddress: Some(host.to_string()),
                ..Default::default()
            }));
        }

        let Some(auth) = &entry.auth else {
            // Credential helpers keep the secret outside the config file.
            return Ok(None);
        };
        let (username, password) = decode_basic_auth(auth)?;

        Ok(Some(DockerCredentials {
            username: Some(username),
            password: Some(password),
            serveraddress: Some(host.to_string()),
            ..Default::default()
        }))
    }

    fn docker_config_path(&self) -> Option<PathBuf> {
        self.docker_config
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".docker").join("config.json")))
    }
}

/// Find the entry of a host. Keys may be bare hosts or full URLs.
fn lookup_auth<'a>(
    auths: &'a HashMap<String, DockerConfigAuth>,
    host: &str,
) -> Option<&'a DockerConfigAuth> {
    if let Some(entry) = auths.get(host) {
        return Some(entry);
    }
    if host == "docker.io"
        && let Some(entry) = auths.get("https://index.docker.io/v1/")
    {
        return Some(entry);
    }
    auths.iter().find_map(|(key, entry)| {
        let bare = key
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or_default();
        (bare == host).then_some(entry)
    })
}

/// Decode a base64 `user:password` pair.
fn decode_basic_auth(auth: &str) -> Result<(String, String)> {
    let decoded = STANDARD
        .decode(auth.trim())
        .context("Registry auth entry is not valid base64")?;
    let decoded = String::from_utf8(decoded).context("Registry auth entry is not valid UTF-8")?;
    let (username, password) = decoded
        .split_once(':')
        .context("Registry auth entry is not in user:password form")?;
    Ok((username.to_string(), password.to_string()))
}
