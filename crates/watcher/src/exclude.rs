//! Exclusion of root-relative paths
//!
//! A path is observable unless it, or one of its ancestors, matches a
//! configured exclusion. The same decision gates both watch registration
//! and event emission, so an excluded subtree is never watched and never
//! reported.

use glob::{Pattern, PatternError};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Caller-supplied predicate over a root-relative path
pub type ExcludeMatcher = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Decides which root-relative paths are observable
///
/// By default, excludes nothing.
#[derive(Clone, Default)]
pub struct ExcludeFilter {
    /// Glob patterns matched against the relative path
    patterns: Arc<Vec<Pattern>>,
    /// Directory names excluded at any depth
    excluded_dirs: Arc<HashSet<OsString>>,
    /// Arbitrary predicates
    matchers: Arc<Vec<ExcludeMatcher>>,
}

impl fmt::Debug for ExcludeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExcludeFilter")
            .field("patterns", &self.patterns)
            .field("excluded_dirs", &self.excluded_dirs)
            .field("matchers", &self.matchers.len())
            .finish()
    }
}

impl ExcludeFilter {
    /// Create a filter that excludes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter from glob patterns
    pub fn from_patterns(patterns: Vec<String>) -> Result<Self, PatternError> {
        Self::builder().patterns(patterns).build()
    }

    /// Create with builder pattern
    pub fn builder() -> ExcludeFilterBuilder {
        ExcludeFilterBuilder::default()
    }

    /// Whether events for `relative_path` may be emitted and, for
    /// directories, whether it may be watched
    ///
    /// The watch root itself (the empty path) is always observable.
    pub fn should_notify(&self, relative_path: &Path) -> bool {
        for prefix in relative_path.ancestors() {
            if prefix.as_os_str().is_empty() {
                break;
            }
            if self.matches(prefix) {
                trace!("Excluding {:?} (matched at {:?})", relative_path, prefix);
                return false;
            }
        }
        true
    }

    /// Whether any exclusion matches this exact path, ignoring ancestors
    fn matches(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name() {
            if self.excluded_dirs.contains(name) {
                return true;
            }
        }

        if self.patterns.iter().any(|p| p.matches_path(path)) {
            return true;
        }

        self.matchers.iter().any(|m| m(path))
    }

    /// Whether no exclusion is configured
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.excluded_dirs.is_empty() && self.matchers.is_empty()
    }
}

/// Builder for ExcludeFilter
#[derive(Default)]
pub struct ExcludeFilterBuilder {
    patterns: Vec<String>,
    excluded_dirs: HashSet<OsString>,
    matchers: Vec<ExcludeMatcher>,
}

impl ExcludeFilterBuilder {
    /// Add a glob pattern to exclude
    pub fn add_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Add multiple patterns
    pub fn patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns.extend(patterns);
        self
    }

    /// Exclude a directory name wherever it appears
    pub fn add_excluded_dir(mut self, name: impl Into<OsString>) -> Self {
        self.excluded_dirs.insert(name.into());
        self
    }

    /// Exclude several directory names
    pub fn excluded_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.excluded_dirs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add an arbitrary predicate over the relative path
    pub fn add_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.matchers.push(Arc::new(matcher));
        self
    }

    /// Build the exclude filter
    pub fn build(self) -> Result<ExcludeFilter, PatternError> {
        let compiled_patterns = self
            .patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExcludeFilter {
            patterns: Arc::new(compiled_patterns),
            excluded_dirs: Arc::new(self.excluded_dirs),
            matchers: Arc::new(self.matchers),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = ExcludeFilter::new();

        assert!(filter.is_empty());
        assert!(filter.should_notify(Path::new("")));
        assert!(filter.should_notify(Path::new("src/main.rs")));
    }

    #[test]
    fn test_glob_patterns() {
        let filter = ExcludeFilter::builder()
            .add_pattern("*.log")
            .add_pattern("build")
            .build()
            .expect("test setup failed");

        assert!(!filter.should_notify(Path::new("debug.log")));
        assert!(!filter.should_notify(Path::new("nested/dir/debug.log")));
        assert!(!filter.should_notify(Path::new("build")));
        assert!(filter.should_notify(Path::new("src/build.rs")));
        assert!(filter.should_notify(Path::new("main.rs")));
    }

    #[test]
    fn test_exclusion_covers_descendants() {
        let filter = ExcludeFilter::from_patterns(vec!["target".to_string()])
            .expect("test setup failed");

        assert!(!filter.should_notify(Path::new("target")));
        assert!(!filter.should_notify(Path::new("target/debug")));
        assert!(!filter.should_notify(Path::new("target/debug/app")));
        assert!(filter.should_notify(Path::new("src/target.rs")));
    }

    #[test]
    fn test_excluded_dir_names_at_any_depth() {
        let filter = ExcludeFilter::builder()
            .excluded_dirs([".git", "node_modules"])
            .build()
            .expect("test setup failed");

        assert!(!filter.should_notify(Path::new(".git")));
        assert!(!filter.should_notify(Path::new(".git/HEAD")));
        assert!(!filter.should_notify(Path::new("web/node_modules/react/index.js")));
        assert!(filter.should_notify(Path::new("web/src/index.js")));
    }

    #[test]
    fn test_custom_matcher() {
        let filter = ExcludeFilter::builder()
            .add_matcher(|path: &Path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
            })
            .build()
            .expect("test setup failed");

        assert!(!filter.should_notify(Path::new(".cache/data")));
        assert!(!filter.should_notify(Path::new("docs/.hidden")));
        assert!(filter.should_notify(Path::new("docs/readme.md")));
    }

    #[test]
    fn test_root_is_always_observable() {
        let filter = ExcludeFilter::from_patterns(vec!["*".to_string()])
            .expect("test setup failed");

        assert!(filter.should_notify(Path::new("")));
        assert!(!filter.should_notify(Path::new("anything")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ExcludeFilter::from_patterns(vec!["[".to_string()]).is_err());
    }
}
