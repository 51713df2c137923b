//! Extension modules and dependency requests

use k6x_errors::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag used when a request names no version
pub const LATEST_TAG: &str = "latest";

/// An extension module pinned to a resolved version or reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub tag: String,
}

impl Module {
    /// Create a new module
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Value of the `--with` flag for this module
    #[must_use]
    pub fn with_arg(&self) -> String {
        format!("{} {}", self.name, self.tag)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.tag)
    }
}

impl FromStr for Module {
    type Err = BuildError;

    /// Parse `name@tag`; a bare `name` gets the `latest` tag
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BuildError::InvalidModule {
            input: s.to_string(),
        };

        let (name, tag) = match s.rsplit_once('@') {
            Some((name, tag)) => (name.trim(), tag.trim()),
            None => (s.trim(), LATEST_TAG),
        };

        if name.is_empty() || tag.is_empty() || name.contains(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self::new(name, tag))
    }
}

/// Ordered module list; order becomes command line order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modules(Vec<Module>);

impl Modules {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, module: Module) {
        self.0.push(module);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Module> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Module] {
        &self.0
    }
}

impl From<Vec<Module>> for Modules {
    fn from(modules: Vec<Module>) -> Self {
        Self(modules)
    }
}

impl FromIterator<Module> for Modules {
    fn from_iter<I: IntoIterator<Item = Module>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Modules {
    type Item = Module;
    type IntoIter = std::vec::IntoIter<Module>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Modules {
    type Item = &'a Module;
    type IntoIter = std::slice::Iter<'a, Module>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Modules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, module) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{module}")?;
        }
        Ok(())
    }
}

/// A user supplied extension request, before resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// Version constraints as given by the user; empty means any
    #[serde(default)]
    pub constraints: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, constraints: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: constraints.into(),
        }
    }
}

impl FromStr for Dependency {
    type Err = BuildError;

    /// Parse `name` or `name@constraints`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, constraints) = match s.split_once('@') {
            Some((name, constraints)) => (name.trim(), constraints.trim()),
            None => (s.trim(), ""),
        };

        if name.is_empty() {
            return Err(BuildError::InvalidModule {
                input: s.to_string(),
            });
        }

        Ok(Self::new(name, constraints))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.constraints)
        }
    }
}
