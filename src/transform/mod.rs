//! # Transformation Engine
//!
//! Turns a raw authority response into the final `Secret.data` map: filter
//! the raw keys, render every planned template against the filtered data,
//! and fold in the `_raw` envelope unless the destination opted out.

pub mod filter;
pub mod plan;
pub mod render;

pub use filter::RegexCache;
pub use plan::{build_plan, PlanError, TransformPlan};
pub use render::{RenderError, TemplateContext};

use crate::constants::RAW_DATA_KEY;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Filter(#[from] filter::FilterError),
    #[error("template {key:?} (from {source}) failed to render: {source_error}")]
    Render {
        key: String,
        source: String,
        source_error: RenderError,
    },
    #[error("destination key {0:?} collides with the reserved raw-data key")]
    ContainsRaw(String),
}

/// Render a plan's templates against `raw` (the authority's key/value
/// response) and produce the final destination data map.
///
/// Precedence when a rendered template key is `_raw`: rejected outright
/// with [`TransformError::ContainsRaw`], since that key is reserved for the
/// unmodified authority payload.
pub fn apply(
    plan: &TransformPlan,
    raw: &BTreeMap<String, Value>,
    regex_cache: &RegexCache,
) -> Result<BTreeMap<String, Vec<u8>>, TransformError> {
    if raw.contains_key(RAW_DATA_KEY) {
        return Err(TransformError::ContainsRaw(RAW_DATA_KEY.to_string()));
    }

    let filtered_keys = regex_cache.apply(raw.keys().cloned(), &plan.excludes, &plan.includes)?;

    let mut filtered = serde_json::Map::new();
    for key in &filtered_keys {
        if let Some(v) = raw.get(key) {
            filtered.insert(key.clone(), v.clone());
        }
    }
    let root = Value::Object({
        let mut m = serde_json::Map::new();
        m.insert("Secrets".to_string(), Value::Object(filtered));
        m
    });

    let mut ctx = TemplateContext::new(&root);

    for source in &plan.source_templates {
        render::render(&source.template, &mut ctx).map_err(|e| TransformError::Render {
            key: source.name.clone(),
            source: "sourceTemplate".to_string(),
            source_error: e,
        })?;
    }

    let mut out = BTreeMap::new();
    for t in &plan.templates {
        if t.key == RAW_DATA_KEY {
            return Err(TransformError::ContainsRaw(t.key.clone()));
        }
        let rendered = render::render(&t.body, &mut ctx).map_err(|e| TransformError::Render {
            key: t.key.clone(),
            source: t.source.clone(),
            source_error: e,
        })?;
        out.insert(t.key.clone(), rendered.into_bytes());
    }

    if !plan.exclude_raw {
        let raw_json = serde_json::to_vec(raw).unwrap_or_default();
        out.insert(RAW_DATA_KEY.to_string(), raw_json);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::transformation::InlineTransformation;
    use serde_json::json;

    #[test]
    fn renders_filtered_keys_and_keeps_raw_by_default() {
        let mut inline = InlineTransformation::default();
        inline
            .templates
            .insert("password".to_string(), "{{ .Secrets.password }}".to_string());

        let plan = build_plan(&inline, &BTreeMap::new()).unwrap();
        let cache = RegexCache::new(16);

        let mut raw = BTreeMap::new();
        raw.insert("password".to_string(), json!("hunter2"));

        let out = apply(&plan, &raw, &cache).unwrap();
        assert_eq!(out.get("password").unwrap(), b"hunter2");
        assert!(out.contains_key(crate::constants::RAW_DATA_KEY));
    }

    #[test]
    fn exclude_raw_drops_the_envelope_key() {
        let mut inline = InlineTransformation::default();
        inline.exclude_raw = true;
        let plan = build_plan(&inline, &BTreeMap::new()).unwrap();
        let cache = RegexCache::new(16);
        let out = apply(&plan, &BTreeMap::new(), &cache).unwrap();
        assert!(!out.contains_key(crate::constants::RAW_DATA_KEY));
    }

    #[test]
    fn destination_key_named_raw_is_rejected() {
        let mut inline = InlineTransformation::default();
        inline.templates.insert(crate::constants::RAW_DATA_KEY.to_string(), "x".to_string());
        let plan = build_plan(&inline, &BTreeMap::new()).unwrap();
        let cache = RegexCache::new(16);
        let err = apply(&plan, &BTreeMap::new(), &cache).unwrap_err();
        assert!(matches!(err, TransformError::ContainsRaw(_)));
    }

    #[test]
    fn raw_authority_key_named_raw_is_rejected() {
        let inline = InlineTransformation::default();
        let plan = build_plan(&inline, &BTreeMap::new()).unwrap();
        let cache = RegexCache::new(16);
        let mut raw = BTreeMap::new();
        raw.insert(crate::constants::RAW_DATA_KEY.to_string(), json!("collides"));
        let err = apply(&plan, &raw, &cache).unwrap_err();
        assert!(matches!(err, TransformError::ContainsRaw(_)));
    }
}
