//! Selection of the submission backend from the identity of the execution
//! system.

use std::fmt;

use sysinfo::System;
use tracing::info;

use crate::Error;
use crate::Result;
use crate::backend::CircleCiBackend;
use crate::backend::LauncherBackend;
use crate::backend::LocalBackend;
use crate::backend::SherlockBackend;
use crate::backend::SubmissionBackend;

/// The kind of a known execution system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Stanford's Sherlock cluster.
    Sherlock,
    /// TACC's Stampede cluster.
    Stampede,
    /// TACC's Lonestar 5 cluster.
    Lonestar5,
    /// The Slurm container used in CI.
    CircleCi,
    /// The local test double.
    Local,
}

impl BackendKind {
    /// Creates the backend for this kind of execution system.
    pub fn create(self) -> Box<dyn SubmissionBackend> {
        match self {
            Self::Sherlock => Box::new(SherlockBackend::new()),
            Self::Stampede => Box::new(LauncherBackend::stampede()),
            Self::Lonestar5 => Box::new(LauncherBackend::lonestar5()),
            Self::CircleCi => Box::new(CircleCiBackend::new()),
            Self::Local => Box::new(LocalBackend::new()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sherlock => write!(f, "sherlock"),
            Self::Stampede => write!(f, "stampede"),
            Self::Lonestar5 => write!(f, "lonestar5"),
            Self::CircleCi => write!(f, "circleci"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// How an identity is matched against a known execution system.
#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// The identity ends with the given domain.
    Suffix(&'static str),
    /// The identity is exactly the given string.
    Exact(&'static str),
}

impl Matcher {
    /// Determines if the identity matches.
    fn matches(&self, identity: &str) -> bool {
        match self {
            Self::Suffix(suffix) => identity.ends_with(suffix),
            Self::Exact(exact) => identity == *exact,
        }
    }
}

/// The known execution systems, in matching order.
const KNOWN_SYSTEMS: &[(Matcher, BackendKind)] = &[
    (
        Matcher::Suffix("ls5.tacc.utexas.edu"),
        BackendKind::Lonestar5,
    ),
    (
        Matcher::Suffix("stampede.tacc.utexas.edu"),
        BackendKind::Stampede,
    ),
    (Matcher::Suffix("stanford.edu"), BackendKind::Sherlock),
    (Matcher::Exact("test.circleci"), BackendKind::CircleCi),
    (Matcher::Exact("test.local"), BackendKind::Local),
];

/// Selects the backend kind for an execution system identity.
pub fn select(identity: &str) -> Result<BackendKind> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(Error::BackendUndetermined);
    }

    KNOWN_SYSTEMS
        .iter()
        .find(|(matcher, _)| matcher.matches(identity))
        .map(|(_, kind)| *kind)
        .ok_or_else(|| Error::BackendNotFound(identity.to_string()))
}

/// Resolves the identity of the execution system.
///
/// An explicitly configured identity takes precedence over the host name.
pub fn resolve_identity(explicit: Option<&str>) -> Result<String> {
    let identity = match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(identity) => identity.to_string(),
        None => System::host_name()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .ok_or(Error::BackendUndetermined)?,
    };

    info!(identity = %identity, "identified execution system");
    Ok(identity)
}
