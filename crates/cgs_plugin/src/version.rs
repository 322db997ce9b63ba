//! Plugin versions and dependency constraints.
//!
//! Versions are `major.minor.patch` with omitted trailing parts defaulting
//! to zero, so `"1"`, `"1.2"`, and `"1.2.3"` all parse. Constraints are
//! comma-separated comparator clauses (`">=1.0,<2.0"`); all clauses must
//! hold. The `~=` comparator is a compatible release within the same
//! major: `~=1.2.3` allows `>=1.2.3,<2.0.0`.

use cgs_foundation::error::{CgsError, CgsResult};

/// A `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `"1"`, `"1.2"`, or `"1.2.3"`.
    ///
    /// # Errors
    /// Returns [`CgsError::InvalidArgument`] for anything else.
    pub fn parse(text: &str) -> CgsResult<Self> {
        let mut parts = [0u32; 3];
        let pieces: Vec<&str> = text.trim().split('.').collect();
        if pieces.is_empty() || pieces.len() > 3 {
            return Err(CgsError::InvalidArgument(format!("bad version '{text}'")));
        }
        for (i, piece) in pieces.iter().enumerate() {
            parts[i] = piece
                .parse()
                .map_err(|_| CgsError::InvalidArgument(format!("bad version '{text}'")))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }

    /// Same-major compatibility: a provider of `self` satisfies a consumer
    /// built against `other` when majors match and `self >= other`.
    pub fn is_compatible_with(self, other: Version) -> bool {
        self.major == other.major && self >= other
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
}

impl Comparator {
    fn holds(self, candidate: Version, bound: Version) -> bool {
        match self {
            Comparator::Ge => candidate >= bound,
            Comparator::Gt => candidate > bound,
            Comparator::Le => candidate <= bound,
            Comparator::Lt => candidate < bound,
            Comparator::Eq => candidate == bound,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Ge => ">=",
            Comparator::Gt => ">",
            Comparator::Le => "<=",
            Comparator::Lt => "<",
            Comparator::Eq => "==",
        }
    }
}

/// A conjunction of comparator clauses a version must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    clauses: Vec<(Comparator, Version)>,
}

impl VersionConstraint {
    /// Matches any version.
    pub fn any() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Parses a comma-separated clause list, e.g. `">=1.0,<2.0"` or `"~=1.4"`.
    ///
    /// # Errors
    /// Returns [`CgsError::InvalidArgument`] for malformed clauses.
    pub fn parse(text: &str) -> CgsResult<Self> {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return Ok(Self::any());
        }
        let mut clauses = Vec::new();
        for clause in text.split(',') {
            let clause = clause.trim();
            if let Some(rest) = clause.strip_prefix("~=") {
                // Compatible release: at least the given version, same major.
                let lower = Version::parse(rest)?;
                clauses.push((Comparator::Ge, lower));
                clauses.push((Comparator::Lt, Version::new(lower.major + 1, 0, 0)));
            } else if let Some(rest) = clause.strip_prefix(">=") {
                clauses.push((Comparator::Ge, Version::parse(rest)?));
            } else if let Some(rest) = clause.strip_prefix("<=") {
                clauses.push((Comparator::Le, Version::parse(rest)?));
            } else if let Some(rest) = clause.strip_prefix("==") {
                clauses.push((Comparator::Eq, Version::parse(rest)?));
            } else if let Some(rest) = clause.strip_prefix('>') {
                clauses.push((Comparator::Gt, Version::parse(rest)?));
            } else if let Some(rest) = clause.strip_prefix('<') {
                clauses.push((Comparator::Lt, Version::parse(rest)?));
            } else {
                // A bare version means exact match.
                clauses.push((Comparator::Eq, Version::parse(clause)?));
            }
        }
        Ok(Self { clauses })
    }

    /// True when every clause holds for `version`.
    pub fn matches(&self, version: Version) -> bool {
        self.clauses
            .iter()
            .all(|(cmp, bound)| cmp.holds(version, *bound))
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "*");
        }
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|(cmp, v)| format!("{}{v}", cmp.symbol()))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

/// A named plugin dependency with its version requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDependency {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl PluginDependency {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }

    /// Parses a spec like `"Physics>=1.0,<2.0"` or just `"Physics"`.
    ///
    /// # Errors
    /// Returns [`CgsError::InvalidArgument`] for empty names or malformed
    /// constraints.
    pub fn parse(spec: &str) -> CgsResult<Self> {
        let spec = spec.trim();
        let split = spec
            .find(|c| ['>', '<', '=', '~'].contains(&c))
            .unwrap_or(spec.len());
        let (name, constraint_text) = spec.split_at(split);
        let name = name.trim();
        if name.is_empty() {
            return Err(CgsError::InvalidArgument(format!(
                "dependency spec '{spec}' has no name"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            constraint: VersionConstraint::parse(constraint_text)?,
        })
    }
}
