use crate::InvocationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// `segment ('.' segment){1..9}` with `segment = [a-zA-Z][a-zA-Z0-9]*`,
/// i.e. 2 to 10 dot-separated segments, each starting with a letter.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*(\.[a-zA-Z][a-zA-Z0-9]*){1,9}$")
        .expect("attribute name pattern is a valid regex")
});

/// A validated fully-qualified attribute name, e.g. `user.roles`.
///
/// The first segments address the policy information point, the last segment
/// the attribute it computes. Construction is the single validation point;
/// holding an `AttributeName` implies the grammar holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeName(String);

impl AttributeName {
    pub fn parse(name: impl Into<String>) -> Result<Self, InvocationError> {
        let name = name.into();
        if NAME_PATTERN.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(InvocationError::InvalidName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AttributeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for AttributeName {
    type Err = InvocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
