//! Descriptors and locators.
//!
//! Parses package manager requests like:
//! - `yarn` (no range; the caller picks the default)
//! - `yarn@3.2.0`
//! - `pnpm@^8`
//! - `yarn@stable` (a tag)

use super::error::PmError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An unresolved `{name, range}` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    /// Semver range, or a tag name where tags are allowed.
    pub range: String,
}

impl Descriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: range.into(),
        }
    }

    /// Parse `name@range`. A bare `name` yields `None` for the range so the
    /// caller can substitute the default version.
    ///
    /// # Errors
    /// Returns an error if the name is empty or invalid, or the range is empty.
    pub fn parse(input: &str) -> Result<(String, Option<String>), PmError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PmError::spec_invalid("Empty package manager spec"));
        }

        match input.split_once('@') {
            Some((name, range)) => {
                validate_name(name, input)?;
                if range.is_empty() {
                    return Err(PmError::spec_invalid(format!(
                        "Invalid package manager spec: empty version range in '{input}'"
                    )));
                }
                Ok((name.to_string(), Some(range.to_string())))
            }
            None => {
                validate_name(input, input)?;
                Ok((input.to_string(), None))
            }
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.range)
    }
}

/// A resolved `{name, reference}` pair naming one concrete release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub name: String,
    pub reference: String,
}

impl Locator {
    #[must_use]
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.reference)
    }
}

fn validate_name(name: &str, input: &str) -> Result<(), PmError> {
    if name.is_empty() {
        return Err(PmError::spec_invalid(format!(
            "Invalid package manager spec: empty name in '{input}'"
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.')
    {
        return Err(PmError::spec_invalid(format!(
            "Invalid package manager name '{name}'"
        )));
    }

    Ok(())
}
