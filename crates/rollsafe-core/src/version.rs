use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A component version as published by its author.
///
/// Component authors rarely follow strict semver: `1.2`, `v3`, and
/// `5.8.1.2` all appear in the wild. Parsing pads missing minor/patch
/// numbers with zeros and carries any fourth-and-later numbers as build
/// metadata, which semver orders numerically as a final tie-break. The
/// original spelling is preserved for display and serialization.
#[derive(Debug, Clone)]
pub struct ComponentVersion {
    raw: String,
    parsed: Version,
}

impl ComponentVersion {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(anyhow!("version must not be empty"));
        }

        let unprefixed = raw
            .strip_prefix('v')
            .or_else(|| raw.strip_prefix('V'))
            .unwrap_or(raw);
        if let Ok(parsed) = Version::parse(unprefixed) {
            return Ok(Self {
                raw: raw.to_string(),
                parsed,
            });
        }

        let (core, pre) = match unprefixed.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (unprefixed, None),
        };
        let parts: Vec<&str> = core.split('.').collect();
        if parts
            .iter()
            .any(|part| part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(anyhow!("unsupported version format: {raw}"));
        }

        let number = |index: usize| -> anyhow::Result<u64> {
            match parts.get(index) {
                Some(part) => part
                    .parse::<u64>()
                    .with_context(|| format!("version component out of range: {raw}")),
                None => Ok(0),
            }
        };

        let mut parsed = Version::new(number(0)?, number(1)?, number(2)?);
        if parts.len() > 3 {
            parsed.build = BuildMetadata::new(&parts[3..].join("."))
                .with_context(|| format!("invalid trailing version components: {raw}"))?;
        }
        if let Some(pre) = pre {
            parsed.pre = Prerelease::new(pre)
                .with_context(|| format!("invalid pre-release suffix: {raw}"))?;
        }

        Ok(Self {
            raw: raw.to_string(),
            parsed,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn semver(&self) -> &Version {
        &self.parsed
    }

    pub fn is_newer_than(&self, other: &ComponentVersion) -> bool {
        self > other
    }
}

impl FromStr for ComponentVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for ComponentVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for ComponentVersion {}

impl PartialOrd for ComponentVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed.cmp(&other.parsed)
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ComponentVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ComponentVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
