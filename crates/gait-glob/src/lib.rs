//! gait-glob
#![deny(unsafe_code)]
//!
//! Path and domain glob matching for policy endpoint constraints (§4.E).

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Result of evaluating a candidate against include/exclude rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Candidate passes both include and exclude filters.
    Allowed,
    /// Candidate matched an exclude pattern.
    DeniedByExclude,
    /// Candidate did not match any include pattern (when includes are specified).
    DeniedByMissingInclude,
}

impl MatchDecision {
    /// Returns `true` only for [`MatchDecision::Allowed`].
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Compiled include/exclude glob pair for path filtering.
///
/// Exclude patterns take precedence: a path matching an exclude glob is denied
/// even if it also matches an include glob. Empty pattern lists are treated as
/// "no constraint" (all paths pass). Policy path patterns use ordinary glob
/// syntax, so a `/repo/**` style pattern matches every descendant.
#[derive(Debug, Clone)]
pub struct IncludeExcludeGlobs {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl IncludeExcludeGlobs {
    /// Compile include and exclude pattern lists into a reusable matcher.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to parse as a glob.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// Evaluate a [`Path`] against the compiled glob rules.
    #[must_use]
    pub fn decide_path(&self, candidate: &Path) -> MatchDecision {
        if self
            .exclude
            .as_ref()
            .is_some_and(|set| set.is_match(candidate))
        {
            return MatchDecision::DeniedByExclude;
        }
        if self
            .include
            .as_ref()
            .is_some_and(|set| !set.is_match(candidate))
        {
            return MatchDecision::DeniedByMissingInclude;
        }
        MatchDecision::Allowed
    }

    /// Convenience wrapper around [`decide_path`](Self::decide_path) for string slices.
    #[must_use]
    pub fn decide_str(&self, candidate: &str) -> MatchDecision {
        self.decide_path(Path::new(candidate))
    }
}

/// Compile a list of glob patterns into a [`GlobSet`], returning `None` for empty input.
///
/// # Errors
///
/// Returns an error if any pattern fails to parse as a glob.
pub fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut b = GlobSetBuilder::new();
    for p in patterns {
        b.add(Glob::new(p).with_context(|| format!("invalid glob: {p}"))?);
    }
    Ok(Some(b.build()?))
}

/// Matches a domain against a single policy pattern supporting three forms:
/// an exact match (`"example.com"`), a subdomain wildcard
/// (`"*.example.com"` matches `example.com` and any subdomain), or a general
/// glob (any other pattern containing `*`, `?`, or `[`). Matching is
/// case-insensitive.
#[must_use]
pub fn domain_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return domain == suffix || domain.ends_with(&format!(".{suffix}"));
    }

    if pattern.contains(['*', '?', '[']) {
        return Glob::new(&pattern)
            .map(|g| g.compile_matcher().is_match(&domain))
            .unwrap_or(false);
    }

    domain == pattern
}

/// Compiled allow/deny rule set for domain endpoint constraints.
///
/// Mirrors [`IncludeExcludeGlobs`]'s precedence (deny wins) but matches
/// patterns with [`domain_matches`] rather than a compiled path [`GlobSet`],
/// since domain patterns support exact and suffix-wildcard forms that
/// `globset` does not model directly.
#[derive(Debug, Clone, Default)]
pub struct DomainRules {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl DomainRules {
    /// Build a domain rule set from allow/deny pattern lists.
    #[must_use]
    pub fn new(allow: &[String], deny: &[String]) -> Self {
        Self {
            allow: allow.to_vec(),
            deny: deny.to_vec(),
        }
    }

    /// Evaluate a domain against the compiled rules.
    #[must_use]
    pub fn decide(&self, domain: &str) -> MatchDecision {
        if self.deny.iter().any(|p| domain_matches(p, domain)) {
            return MatchDecision::DeniedByExclude;
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|p| domain_matches(p, domain)) {
            return MatchDecision::DeniedByMissingInclude;
        }
        MatchDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainRules, IncludeExcludeGlobs, MatchDecision, domain_matches};

    fn patterns(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn allows_everything_without_patterns() {
        let rules = IncludeExcludeGlobs::new(&Vec::new(), &Vec::new()).expect("compile rules");
        assert_eq!(rules.decide_str("src/lib.rs"), MatchDecision::Allowed);
    }

    #[test]
    fn include_patterns_gate_matches() {
        let rules = IncludeExcludeGlobs::new(&patterns(&["/repo/**"]), &Vec::new())
            .expect("compile include rules");
        assert_eq!(rules.decide_str("/repo/src/lib.rs"), MatchDecision::Allowed);
        assert_eq!(
            rules.decide_str("/other/README.md"),
            MatchDecision::DeniedByMissingInclude
        );
    }

    #[test]
    fn exclude_patterns_take_precedence() {
        let rules =
            IncludeExcludeGlobs::new(&patterns(&["/repo/**"]), &patterns(&["/repo/secrets/**"]))
                .expect("compile include/exclude rules");
        assert_eq!(
            rules.decide_str("/repo/secrets/key.pem"),
            MatchDecision::DeniedByExclude
        );
    }

    #[test]
    fn invalid_pattern_returns_error() {
        let err = IncludeExcludeGlobs::new(&patterns(&["["]), &Vec::new())
            .expect_err("invalid glob should fail");
        assert!(err.to_string().contains("invalid glob"));
    }

    #[test]
    fn build_globset_with_empty_returns_none() {
        let result = super::build_globset(&[]).expect("should succeed");
        assert!(result.is_none());
    }

    #[test]
    fn domain_exact_match() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("Example.COM", "example.com"));
        assert!(!domain_matches("example.com", "evil-example.com"));
    }

    #[test]
    fn domain_suffix_wildcard_matches_base_and_subdomains() {
        assert!(domain_matches("*.example.com", "example.com"));
        assert!(domain_matches("*.example.com", "api.example.com"));
        assert!(domain_matches("*.example.com", "deep.api.example.com"));
        assert!(!domain_matches("*.example.com", "notexample.com"));
    }

    #[test]
    fn domain_general_glob() {
        assert!(domain_matches("api-*.internal", "api-1.internal"));
        assert!(!domain_matches("api-*.internal", "web-1.internal"));
    }

    #[test]
    fn domain_rules_deny_overrides_allow() {
        let rules = DomainRules::new(
            &patterns(&["*.example.com"]),
            &patterns(&["blocked.example.com"]),
        );
        assert_eq!(rules.decide("api.example.com"), MatchDecision::Allowed);
        assert_eq!(
            rules.decide("blocked.example.com"),
            MatchDecision::DeniedByExclude
        );
        assert_eq!(
            rules.decide("other.com"),
            MatchDecision::DeniedByMissingInclude
        );
    }

    #[test]
    fn domain_rules_no_allow_list_permits_anything_not_denied() {
        let rules = DomainRules::new(&[], &patterns(&["evil.com"]));
        assert_eq!(rules.decide("good.com"), MatchDecision::Allowed);
        assert_eq!(rules.decide("evil.com"), MatchDecision::DeniedByExclude);
    }
}
