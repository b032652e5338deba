//! Wall-clock runtime limits.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ParseError;

/// The number of seconds in a day.
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Represents a wall-clock runtime limit with a resolution of one second.
///
/// Runtimes are parsed from the formats accepted by Slurm's `--time`
/// (`D-HH:MM:SS`, `HH:MM:SS`, `MM:SS` or plain seconds) and are displayed as
/// zero-padded `HH:MM:SS`, with hours allowed to exceed 24.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Runtime(u64);

impl Runtime {
    /// Creates a runtime from a number of seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Gets the runtime in seconds.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Gets the runtime as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Scales the runtime by the given fraction, truncating to whole seconds.
    ///
    /// The fraction is applied with a resolution of one thousandth.
    pub fn fraction(&self, fraction: f64) -> Self {
        let permille = (fraction.clamp(0.0, 1.0) * 1000.0).round() as u64;
        // Split at the thousand so the product cannot exceed the runtime.
        Self(self.0 / 1000 * permille + self.0 % 1000 * permille / 1000)
    }
}

impl FromStr for Runtime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Runtime {
            value: s.to_string(),
        };

        let trimmed = s.trim();
        let (days, clock) = match trimmed.split_once('-') {
            Some((days, clock)) => (days.parse::<u64>().map_err(|_| invalid())?, clock),
            None => (0, trimmed),
        };

        let parts = clock.split(':').collect::<Vec<_>>();
        if parts.is_empty() || parts.len() > 3 || (days > 0 && parts.len() != 3) {
            return Err(invalid());
        }

        let mut secs = 0u64;
        for part in parts {
            let value = part.parse::<u64>().map_err(|_| invalid())?;
            secs = secs
                .checked_mul(60)
                .and_then(|s| s.checked_add(value))
                .ok_or_else(invalid)?;
        }

        days.checked_mul(SECONDS_PER_DAY)
            .and_then(|d| d.checked_add(secs))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (minutes, seconds) = (self.0 / 60, self.0 % 60);
        let (hours, minutes) = (minutes / 60, minutes % 60);
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl TryFrom<String> for Runtime {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Runtime> for String {
    fn from(value: Runtime) -> Self {
        value.to_string()
    }
}
