//! Scope allowlist/denylist/lockfile matching.
//!
//! Glob semantics are POSIX-style with `**` matching any depth, built on
//! `globset`. Denylist and lockfile rules always take precedence over the
//! allowlist: a path matching both is still out of scope.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

use crate::types::ScopeLock;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Why a path was rejected, kept distinct so diagnostics and the
/// `scope_violation` event can name the exact rule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeViolation {
    NotAllowlisted,
    Denylisted,
    LockfileWithoutDepsAllowed,
}

impl ScopeViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAllowlisted => "not_allowlisted",
            Self::Denylisted => "denylisted",
            Self::LockfileWithoutDepsAllowed => "lockfile_without_deps_allowed",
        }
    }
}

/// Compiled glob sets for one run's scope lock. Cheap to clone only in the
/// sense that it's `Arc`-free; build once per run and reuse.
pub struct ScopeGuard {
    allow: GlobSet,
    deny: GlobSet,
    lockfiles: GlobSet,
    allow_deps: bool,
    has_allowlist: bool,
}

impl ScopeGuard {
    pub fn build(lock: &ScopeLock) -> Result<Self, ScopeError> {
        Ok(Self {
            allow: compile(&lock.allowlist)?,
            deny: compile(&lock.denylist)?,
            lockfiles: compile(&lock.lockfiles)?,
            allow_deps: lock.allow_deps,
            has_allowlist: !lock.allowlist.is_empty(),
        })
    }

    /// Check a single repo-relative path. `Ok(())` means in scope.
    pub fn check(&self, path: &str) -> Result<(), ScopeViolation> {
        let normalized = normalize_path(path);

        if self.deny.is_match(&normalized) {
            return Err(ScopeViolation::Denylisted);
        }
        if self.lockfiles.is_match(&normalized) && !self.allow_deps {
            return Err(ScopeViolation::LockfileWithoutDepsAllowed);
        }
        if self.has_allowlist && !self.allow.is_match(&normalized) {
            return Err(ScopeViolation::NotAllowlisted);
        }
        Ok(())
    }

    /// Partition a changed-file list into in-scope and out-of-scope paths,
    /// preserving input order in both output vectors.
    pub fn partition_changed_files<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> (Vec<&'a str>, Vec<(&'a str, ScopeViolation)>) {
        let mut in_scope = Vec::new();
        let mut out_of_scope = Vec::new();
        for path in paths {
            match self.check(path) {
                Ok(()) => in_scope.push(path),
                Err(violation) => out_of_scope.push((path, violation)),
            }
        }
        (in_scope, out_of_scope)
    }
}

fn compile(patterns: &[String]) -> Result<GlobSet, ScopeError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ScopeError::InvalidGlob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ScopeError::InvalidGlob {
        pattern: patterns.join(","),
        source,
    })
}

/// Strip a leading `./` and normalize `\` separators so Windows-authored
/// paths still match POSIX-style glob patterns.
fn normalize_path(path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.replace('\\', "/")
}

/// True if any of `paths` matches any of `patterns`. Used to evaluate a
/// risk trigger's glob set against a milestone's changed files (§4.6).
/// An empty pattern or path list never matches; an invalid pattern set
/// is treated as a non-match rather than propagating a build error, since
/// a misconfigured risk trigger should fail open, not block verification.
pub fn any_path_matches(patterns: &[String], paths: &[String]) -> bool {
    if patterns.is_empty() || paths.is_empty() {
        return false;
    }
    let Ok(set) = compile(patterns) else {
        return false;
    };
    paths.iter().any(|p| set.is_match(normalize_path(p)))
}

/// True if two glob pattern sets can ever match the same path, checked by
/// cross-matching each pattern's own literal prefix against the other
/// set's compiled globs (and vice versa) rather than requiring the
/// patterns to be textually identical. This catches cases like `src/**`
/// vs `src/feature/**`, which share no pattern string but do overlap.
pub fn globs_overlap(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (Ok(set_a), Ok(set_b)) = (compile(a), compile(b)) else {
        return false;
    };
    a.iter().any(|pattern| set_b.is_match(normalize_path(&glob_literal_prefix(pattern))))
        || b.iter().any(|pattern| set_a.is_match(normalize_path(&glob_literal_prefix(pattern))))
}

/// The longest literal (glob-metacharacter-free) prefix of a pattern,
/// used as a representative concrete path to test against the other
/// side's compiled `GlobSet`.
fn glob_literal_prefix(pattern: &str) -> String {
    let end = pattern.find(['*', '?', '[', '{']).unwrap_or(pattern.len());
    let prefix = &pattern[..end];
    if prefix.is_empty() {
        pattern.to_string()
    } else {
        prefix.trim_end_matches('/').to_string()
    }
}

/// Check an environment-variable name against the owning run's allowlist,
/// used to decide whether a worker subprocess may inherit it.
pub fn is_env_allowed(name: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|allowed| allowed == name)
}

/// True if `path` falls under any of `owned_paths` (directory-prefix match,
/// not glob match) — used by the collision detector's precise stage.
pub fn is_owned(path: &str, owned_paths: &[String]) -> bool {
    let normalized = normalize_path(path);
    let path = Path::new(normalized.as_str());
    owned_paths.iter().any(|owned| {
        let owned = normalize_path(owned);
        path.starts_with(Path::new(&owned))
    })
}

/// Normalize a run's declared `owned_paths`: strip `./`, normalize
/// separators, append `/**` to bare directory entries (anything without a
/// glob character or a file extension on its last segment), and drop
/// duplicates while preserving first-seen order.
pub fn normalize_owned_paths(paths: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for raw in paths {
        let mut p = normalize_path(raw);
        let last_segment = p.rsplit('/').next().unwrap_or(&p);
        let looks_like_bare_dir = !p.contains('*') && !last_segment.contains('.');
        if looks_like_bare_dir {
            if p.ends_with('/') {
                p.push_str("**");
            } else {
                p.push_str("/**");
            }
        }
        if seen.insert(p.clone()) {
            out.push(p);
        }
    }
    out
}

/// Glob-based ownership check distinct from the allowlist/denylist scope
/// check: a file outside every owned path is an `ownership_violation`, not
/// a `scope_violation`, even if it would otherwise be in scope.
pub struct OwnershipGuard {
    owned: GlobSet,
}

impl OwnershipGuard {
    pub fn build(owned_paths: &[String]) -> Result<Self, ScopeError> {
        Ok(Self {
            owned: compile(&normalize_owned_paths(owned_paths))?,
        })
    }

    pub fn is_owned(&self, path: &str) -> bool {
        self.owned.is_match(normalize_path(path))
    }
}
