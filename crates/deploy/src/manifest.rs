//! Manifest templates with environment-style placeholders.
//!
//! Supported syntax:
//! - `${VAR}` and `$VAR`: value of `VAR`
//! - `${VAR:-default}`: `default` when `VAR` is unset or empty
//! - `${VAR-default}`: `default` when `VAR` is unset
//! - `$$`: a literal `$`
//!
//! Every other `${...}` form (`${VAR:?msg}`, `${1}`, nested defaults) is
//! rejected, as is a placeholder without a value or default. Rendering never
//! leaves placeholder syntax in its output.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Any `$` construct. `open` catches a `${` whose body is not brace-free.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$(?:(?P<escape>\$)|\{(?P<body>[^{}]*)\}|(?P<bare>[A-Za-z_][A-Za-z0-9_]*)|(?P<open>\{))",
    )
    .expect("placeholder regex is valid")
});

/// The body of a supported `${...}` placeholder.
static BRACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:?-)(?P<default>[^$]*))?$")
        .expect("braced placeholder regex is valid")
});

/// Longest placeholder excerpt quoted in errors.
const EXCERPT_LEN: usize = 40;

/// Errors raised while loading or rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("manifest references undefined variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("manifest contains unsupported placeholders: {}", .0.join(", "))]
    InvalidPlaceholders(Vec<String>),

    #[error("failed to read manifest template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest template {0} contains no .yaml or .yml files")]
    Empty(PathBuf),
}

/// Variables available to a template.
pub type Variables = BTreeMap<String, String>;

/// One template document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    /// Where the document was loaded from, relative to the template root.
    pub path: PathBuf,
    pub content: String,
}

/// A parsed `$` construct.
enum Placeholder<'a> {
    /// `$$`
    Escape,
    Var {
        name: &'a str,
        /// `(":-" | "-", default)`
        default: Option<(&'a str, &'a str)>,
    },
    /// Unsupported syntax, with an excerpt for the error message.
    Invalid(String),
}

impl<'a> Placeholder<'a> {
    fn parse(caps: &Captures<'a>, content: &'a str) -> Self {
        if caps.name("escape").is_some() {
            return Self::Escape;
        }
        if let Some(name) = caps.name("bare") {
            return Self::Var {
                name: name.as_str(),
                default: None,
            };
        }
        if let Some(body) = caps.name("body")
            && let Some(parts) = BRACED.captures(body.as_str())
            && let Some(name) = parts.name("name")
        {
            let default = parts
                .name("op")
                .zip(parts.name("default"))
                .map(|(op, default)| (op.as_str(), default.as_str()));
            return Self::Var {
                name: name.as_str(),
                default,
            };
        }

        let start = caps.get(0).map_or(0, |m| m.start());
        Self::Invalid(excerpt(&content[start..]))
    }

    /// The value of a variable placeholder. `Err` carries the name of an undefined variable.
    fn resolve(&self, vars: &'a Variables) -> Result<Cow<'a, str>, &'a str> {
        match *self {
            Self::Escape => Ok(Cow::Borrowed("$")),
            Self::Invalid(_) => Ok(Cow::Borrowed("")),
            Self::Var { name, default } => match (vars.get(name), default) {
                (Some(value), Some((":-", default))) if value.is_empty() => Ok(Cow::Borrowed(default)),
                (Some(value), _) => Ok(Cow::Borrowed(value.as_str())),
                (None, Some((_, default))) => Ok(Cow::Borrowed(default)),
                (None, None) => Err(name),
            },
        }
    }
}

/// The placeholder text up to its closing brace or end of line, shortened.
fn excerpt(text: &str) -> String {
    let end = text
        .find('}')
        .map(|i| i + 1)
        .into_iter()
        .chain(text.find('\n'))
        .min()
        .unwrap_or(text.len());
    let snippet = &text[..end];

    match snippet.char_indices().nth(EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &snippet[..cut]),
        None => snippet.to_string(),
    }
}

/// A manifest template: a single file or every YAML file of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    files: Vec<TemplateFile>,
}

impl ManifestTemplate {
    /// Build a template from an in-memory string.
    pub fn inline(content: impl Into<String>) -> Self {
        Self {
            files: vec![TemplateFile {
                path: PathBuf::from("manifest.yaml"),
                content: content.into(),
            }],
        }
    }

    /// Load a template file, or all `*.yaml`/`*.yml` files below a directory in path order.
    ///
    /// Hidden files and directories are skipped.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let io_err = |source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        };

        if !path.is_dir() {
            let content = std::fs::read_to_string(path).map_err(io_err)?;
            let name = path.file_name().map(PathBuf::from).unwrap_or_default();
            return Ok(Self {
                files: vec![TemplateFile { path: name, content }],
            });
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            });

        for entry in walker {
            let entry = entry.map_err(|e| io_err(e.into()))?;
            let is_yaml = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !entry.file_type().is_file() || !is_yaml {
                continue;
            }

            let content = std::fs::read_to_string(entry.path()).map_err(|source| TemplateError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            let relative = entry
                .path()
                .strip_prefix(path)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(TemplateFile {
                path: relative,
                content,
            });
        }

        if files.is_empty() {
            return Err(TemplateError::Empty(path.to_path_buf()));
        }

        tracing::debug!(path = %path.display(), files = files.len(), "Manifest template loaded");
        Ok(Self { files })
    }

    pub fn files(&self) -> &[TemplateFile] {
        &self.files
    }

    fn placeholders(&self) -> impl Iterator<Item = Placeholder<'_>> {
        self.files.iter().flat_map(|file| {
            PLACEHOLDER
                .captures_iter(&file.content)
                .map(|caps| Placeholder::parse(&caps, &file.content))
        })
    }

    /// Names of all variables referenced by the template, sorted.
    pub fn variables(&self) -> BTreeSet<String> {
        self.placeholders()
            .filter_map(|placeholder| match placeholder {
                Placeholder::Var { name, .. } => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Placeholders using unsupported syntax, in template order.
    pub fn invalid_placeholders(&self) -> Vec<String> {
        self.placeholders()
            .filter_map(|placeholder| match placeholder {
                Placeholder::Invalid(excerpt) => Some(excerpt),
                _ => None,
            })
            .collect()
    }

    /// Variables that would make rendering fail: referenced, not provided, and without default.
    pub fn missing_variables(&self, vars: &Variables) -> Vec<String> {
        let missing: BTreeSet<String> = self
            .placeholders()
            .filter_map(|placeholder| placeholder.resolve(vars).err().map(str::to_string))
            .collect();
        missing.into_iter().collect()
    }

    /// Check that the template renders with these variables, without rendering it.
    pub fn check(&self, vars: &Variables) -> Result<(), TemplateError> {
        let invalid = self.invalid_placeholders();
        if !invalid.is_empty() {
            return Err(TemplateError::InvalidPlaceholders(invalid));
        }

        let missing = self.missing_variables(vars);
        if !missing.is_empty() {
            return Err(TemplateError::MissingVariables(missing));
        }

        Ok(())
    }

    /// Render all documents, joined as a multi-document YAML stream.
    pub fn render(&self, vars: &Variables) -> Result<String, TemplateError> {
        self.check(vars)?;

        let documents: Vec<String> = self
            .files
            .iter()
            .map(|file| {
                PLACEHOLDER
                    .replace_all(&file.content, |caps: &Captures<'_>| {
                        Placeholder::parse(caps, &file.content)
                            .resolve(vars)
                            .unwrap_or_default()
                            .into_owned()
                    })
                    .into_owned()
            })
            .collect();

        if documents.len() == 1 {
            return Ok(documents.into_iter().next().unwrap_or_default());
        }

        let mut rendered = String::new();
        for document in documents {
            let document = document.trim_start_matches("---\n");
            if !rendered.is_empty() {
                rendered.push_str("---\n");
            }
            rendered.push_str(document);
            if !document.ends_with('\n') {
                rendered.push('\n');
            }
        }
        Ok(rendered)
    }
}

/// SHA-256 of a rendered manifest, hex encoded.
pub fn manifest_digest(rendered: &str) -> String {
    hex::encode(Sha256::digest(rendered.as_bytes()))
}
