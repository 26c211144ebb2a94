use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Package;

/// Two-tier advisory level. `Fatal` blocks installation, `Warn` only reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warn = 0,
    Fatal = 1,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Warn => "warn",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized vulnerability report for one installed package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub message: String,
    pub level: Level,
    pub package: String,
    pub url: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Advisory {
    /// Primary ID followed by all aliases.
    pub fn identity(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn is_fatal(&self) -> bool {
        self.level == Level::Fatal
    }
}

/// Everything the CLI reports for one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_time: DateTime<Utc>,
    pub packages: Vec<Package>,
    pub advisories: Vec<Advisory>,
}

impl ScanResult {
    pub fn new(packages: Vec<Package>, advisories: Vec<Advisory>) -> Self {
        Self {
            scan_time: Utc::now(),
            packages,
            advisories,
        }
    }

    pub fn has_fatal(&self) -> bool {
        self.advisories.iter().any(Advisory::is_fatal)
    }

    pub fn count(&self, level: Level) -> usize {
        self.advisories.iter().filter(|a| a.level == level).count()
    }
}
