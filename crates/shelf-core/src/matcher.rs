//! Version matcher.
//!
//! Picks one version out of the candidates an index reports. An explicit
//! constraint is honoured exactly or not at all; without one the newest
//! version by [`Version`] ordering wins.

use shelf_schema::Version;

use crate::error::{EngineError, Result};

/// Select a version of `name` from `candidates`.
///
/// # Errors
///
/// [`EngineError::PackageNotFound`] if there are no candidates,
/// [`EngineError::VersionNotFound`] if `constraint` matches none of them.
pub fn select<'a>(
    name: &str,
    candidates: &'a [Version],
    constraint: Option<&Version>,
) -> Result<&'a Version> {
    if candidates.is_empty() {
        return Err(EngineError::PackageNotFound(name.to_string()));
    }

    let Some(wanted) = constraint else {
        return candidates
            .iter()
            .max()
            .ok_or_else(|| EngineError::PackageNotFound(name.to_string()));
    };

    candidates
        .iter()
        .find(|v| v.as_str() == wanted.as_str())
        .or_else(|| candidates.iter().find(|v| v.is_equivalent(wanted)))
        .ok_or_else(|| EngineError::VersionNotFound {
            name: name.to_string(),
            version: wanted.to_string(),
        })
}
