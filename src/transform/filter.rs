//! Regex include/exclude filtering over raw authority keys, with a bounded
//! LRU of compiled patterns so a hot `Transformation` object referenced by
//! many managed secret resources doesn't recompile the same regex per
//! reconcile.

use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub struct RegexCache {
    inner: Mutex<lru::LruCache<String, Regex>>,
}

impl std::fmt::Debug for RegexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexCache").finish_non_exhaustive()
    }
}

impl RegexCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(256).expect("non-zero"));
        Self {
            inner: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    fn compiled(&self, pattern: &str) -> Result<Regex, FilterError> {
        let mut cache = self.inner.lock().expect("regex cache mutex poisoned");
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|source| FilterError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        cache.put(pattern.to_string(), re.clone());
        Ok(re)
    }

    /// Apply excludes then includes: a key surviving `excludes` is kept only
    /// if `includes` is empty or the key matches at least one include
    /// pattern.
    pub fn apply(
        &self,
        keys: impl IntoIterator<Item = String>,
        excludes: &[String],
        includes: &[String],
    ) -> Result<Vec<String>, FilterError> {
        let exclude_patterns = excludes
            .iter()
            .map(|p| self.compiled(p))
            .collect::<Result<Vec<_>, _>>()?;
        let include_patterns = includes
            .iter()
            .map(|p| self.compiled(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys
            .into_iter()
            .filter(|k| !exclude_patterns.iter().any(|re| re.is_match(k)))
            .filter(|k| include_patterns.is_empty() || include_patterns.iter().any(|re| re.is_match(k)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_then_includes() {
        let cache = RegexCache::new(16);
        let keys = vec!["password".to_string(), "username".to_string(), "debug_token".to_string()];
        let result = cache
            .apply(keys, &["^debug_.*".to_string()], &["^user.*|^pass.*".to_string()])
            .unwrap();
        assert_eq!(result, vec!["password".to_string(), "username".to_string()]);
    }

    #[test]
    fn empty_includes_keeps_everything_not_excluded() {
        let cache = RegexCache::new(16);
        let keys = vec!["a".to_string(), "b".to_string()];
        let result = cache.apply(keys, &[], &[]).unwrap();
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn invalid_pattern_reports_the_offending_string() {
        let cache = RegexCache::new(16);
        let err = cache.apply(Vec::<String>::new(), &["(".to_string()], &[]).unwrap_err();
        match err {
            FilterError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "("),
        }
    }

    #[test]
    fn cache_reuses_compiled_pattern() {
        let cache = RegexCache::new(16);
        cache.compiled("^a.*").unwrap();
        assert_eq!(cache.inner.lock().unwrap().len(), 1);
        cache.compiled("^a.*").unwrap();
        assert_eq!(cache.inner.lock().unwrap().len(), 1);
    }
}
