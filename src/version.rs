use std::fmt;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

/// SemVer 2.0 pattern; pre-release and build metadata are accepted but ignored for ordering.
static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)",
        r"(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?",
        r"(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$"
    ))
    .expect("semantic version pattern compiles")
});

/// First engine release that accepts several `-<kind>=<path>` report flags at once.
const MULTI_REPORT_VERSION: SemanticVersion = SemanticVersion {
    major: 4,
    minor: 0,
    patch: 0,
};

/// Engine version reduced to its numeric core.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct SemanticVersion {
    pub(crate) major: u32,
    pub(crate) minor: u32,
    pub(crate) patch: u32,
}

impl SemanticVersion {
    pub(crate) fn parse(version: &str) -> Result<Self> {
        let captures = PATTERN
            .captures(version.trim())
            .with_context(|| format!("{version} is not valid as a semantic version"))?;
        let component = |index: usize| -> Result<u32> {
            captures[index]
                .parse()
                .with_context(|| format!("{version} has an out-of-range version component"))
        };
        Ok(Self {
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
        })
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether the engine accepts one report flag per enabled report.
///
/// An unknown version is treated as a current engine.
pub(crate) fn supports_multiple_reports(tool_version: Option<&str>) -> Result<bool> {
    let Some(version) = tool_version else {
        return Ok(true);
    };
    let version = SemanticVersion::parse(version)?;
    Ok(version >= MULTI_REPORT_VERSION)
}
