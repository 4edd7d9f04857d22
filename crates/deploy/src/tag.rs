//! Timestamp image tags.
//!
//! A tag is generated once at the start of a pipeline run and reused for the
//! local build, the registry push and the manifest substitution.

use std::{fmt, str::FromStr};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// `strftime` format of a tag, e.g. `20240101T000000Z`.
pub const TAG_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A UTC timestamp tag with second resolution.
///
/// Two runs started within the same second produce the same tag. The later
/// push overwrites the earlier one in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageTag(DateTime<Utc>);

impl ImageTag {
    /// Generate a tag for the current time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build a tag from a timestamp, truncating sub-second precision.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp();
        Self(DateTime::from_timestamp(secs, 0).unwrap_or(at))
    }

    pub fn as_string(&self) -> String {
        self.0.format(TAG_FORMAT).to_string()
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TAG_FORMAT))
    }
}

impl FromStr for ImageTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let naive = NaiveDateTime::parse_from_str(s, TAG_FORMAT)
            .with_context(|| format!("Invalid image tag '{s}', expected YYYYMMDDTHHMMSSZ"))?;
        Ok(Self(naive.and_utc()))
    }
}

impl TryFrom<String> for ImageTag {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageTag> for String {
    fn from(tag: ImageTag) -> Self {
        tag.as_string()
    }
}
