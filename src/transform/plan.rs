//! Gathers the inline and referenced `Transformation` objects attached to a
//! `Destination` into one deterministically ordered plan: which templates
//! render which destination keys, and which regex filters apply to the raw
//! authority data before any template runs.

use crate::crd::transformation::{InlineTransformation, SourceTemplate, Transformation};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("transformation reference hop depth exceeded")]
    HopDepthExceeded,
    #[error("referenced transformation {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("template {name} referenced from {source} does not exist")]
    MissingTemplateRef { source: String, name: String },
    #[error("duplicate template name {key} across all sources")]
    DuplicateTemplateKey { key: String },
}

/// A single destination-key template, tagged with where it came from for
/// error messages.
#[derive(Debug, Clone)]
pub struct PlannedTemplate {
    pub key: String,
    pub body: String,
    pub source: String,
}

/// The fully resolved set of work for one destination: source templates to
/// render first (for side-effect variables), keyed templates to render into
/// the output, and the merged include/exclude filter lists.
#[derive(Debug, Default)]
pub struct TransformPlan {
    pub source_templates: Vec<SourceTemplate>,
    pub templates: Vec<PlannedTemplate>,
    pub excludes: Vec<String>,
    pub includes: Vec<String>,
    pub exclude_raw: bool,
}

/// Build a plan from an inline transformation block, resolving each
/// `transformationRef` against `resolved` (already-fetched `Transformation`
/// objects, keyed by `namespace/name`). `resolved` is expected to have been
/// populated by the caller walking references up to the maximum hop depth;
/// a reference missing from it is treated as not found.
pub fn build_plan(
    inline: &InlineTransformation,
    resolved: &BTreeMap<String, Transformation>,
) -> Result<TransformPlan, PlanError> {
    let mut plan = TransformPlan {
        excludes: inline.excludes.clone(),
        includes: inline.includes.clone(),
        exclude_raw: inline.exclude_raw,
        ..Default::default()
    };

    // Inline templates sort by key so plan ordering never depends on map
    // iteration order.
    let mut inline_keys: Vec<&String> = inline.templates.keys().collect();
    inline_keys.sort();
    for key in inline_keys {
        plan.templates.push(PlannedTemplate {
            key: key.clone(),
            body: inline.templates[key].clone(),
            source: "inline".to_string(),
        });
    }

    for r#ref in &inline.transformation_refs {
        let lookup_key = format!(
            "{}/{}",
            r#ref.namespace.as_deref().unwrap_or(""),
            r#ref.name
        );
        let obj = resolved
            .get(&lookup_key)
            .ok_or_else(|| PlanError::NotFound {
                namespace: r#ref.namespace.clone().unwrap_or_default(),
                name: r#ref.name.clone(),
            })?;

        plan.source_templates.extend(obj.spec.source_templates.clone());

        if !r#ref.ignore_excludes {
            plan.excludes.extend(obj.spec.excludes.clone());
        }
        if !r#ref.ignore_includes {
            plan.includes.extend(obj.spec.includes.clone());
        }

        if r#ref.template_refs.is_empty() {
            let mut keys: Vec<&String> = obj.spec.templates.keys().collect();
            keys.sort();
            for key in keys {
                plan.templates.push(PlannedTemplate {
                    key: key.clone(),
                    body: obj.spec.templates[key].clone(),
                    source: lookup_key.clone(),
                });
            }
        } else {
            for tr in &r#ref.template_refs {
                let body = obj.spec.templates.get(&tr.name).ok_or_else(|| PlanError::MissingTemplateRef {
                    source: lookup_key.clone(),
                    name: tr.name.clone(),
                })?;
                plan.templates.push(PlannedTemplate {
                    key: tr.key_override.clone().unwrap_or_else(|| tr.name.clone()),
                    body: body.clone(),
                    source: lookup_key.clone(),
                });
            }
        }
    }

    // Duplicate destination keys across all sources are an error, not a
    // silent overwrite: the user almost certainly didn't mean for two
    // templates to race for the same output key.
    let mut seen: BTreeMap<String, ()> = BTreeMap::new();
    for t in &plan.templates {
        if seen.insert(t.key.clone(), ()).is_some() {
            return Err(PlanError::DuplicateTemplateKey { key: t.key.clone() });
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::transformation::{TemplateRef, TransformationRef, TransformationSpec};
    use std::collections::BTreeMap as Map;

    fn xform(templates: &[(&str, &str)]) -> Transformation {
        Transformation::new(
            "shared",
            TransformationSpec {
                templates: templates.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                source_templates: vec![],
                excludes: vec![],
                includes: vec![],
            },
        )
    }

    #[test]
    fn inline_templates_are_sorted_by_key() {
        let mut inline = InlineTransformation::default();
        inline.templates.insert("b".to_string(), "B".to_string());
        inline.templates.insert("a".to_string(), "A".to_string());
        let plan = build_plan(&inline, &Map::new()).unwrap();
        let keys: Vec<&str> = plan.templates.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn missing_reference_is_reported_with_namespace_and_name() {
        let mut inline = InlineTransformation::default();
        inline.transformation_refs.push(TransformationRef {
            name: "missing".to_string(),
            namespace: Some("ns".to_string()),
            template_refs: vec![],
            ignore_excludes: false,
            ignore_includes: false,
        });
        let err = build_plan(&inline, &Map::new()).unwrap_err();
        match err {
            PlanError::NotFound { namespace, name } => {
                assert_eq!(namespace, "ns");
                assert_eq!(name, "missing");
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn missing_template_ref_is_an_error() {
        let mut resolved = Map::new();
        resolved.insert("ns/shared".to_string(), xform(&[("tpl", "{{ .v }}")]));

        let mut inline = InlineTransformation::default();
        inline.transformation_refs.push(TransformationRef {
            name: "shared".to_string(),
            namespace: Some("ns".to_string()),
            template_refs: vec![TemplateRef {
                name: "nonexistent".to_string(),
                key_override: None,
            }],
            ignore_excludes: false,
            ignore_includes: false,
        });

        let err = build_plan(&inline, &resolved).unwrap_err();
        assert!(matches!(err, PlanError::MissingTemplateRef { .. }));
    }

    #[test]
    fn duplicate_template_key_across_sources_is_an_error() {
        let mut resolved = Map::new();
        resolved.insert("ns/shared".to_string(), xform(&[("dup", "{{ .v }}")]));

        let mut inline = InlineTransformation::default();
        inline.templates.insert("dup".to_string(), "{{ .v }}".to_string());
        inline.transformation_refs.push(TransformationRef {
            name: "shared".to_string(),
            namespace: Some("ns".to_string()),
            template_refs: vec![],
            ignore_excludes: false,
            ignore_includes: false,
        });

        let err = build_plan(&inline, &resolved).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateTemplateKey { key } if key == "dup"));
    }

    #[test]
    fn template_refs_can_rename_via_key_override() {
        let mut resolved = Map::new();
        resolved.insert("ns/shared".to_string(), xform(&[("tpl", "{{ .v }}")]));

        let mut inline = InlineTransformation::default();
        inline.transformation_refs.push(TransformationRef {
            name: "shared".to_string(),
            namespace: Some("ns".to_string()),
            template_refs: vec![TemplateRef {
                name: "tpl".to_string(),
                key_override: Some("renamed".to_string()),
            }],
            ignore_excludes: false,
            ignore_includes: false,
        });

        let plan = build_plan(&inline, &resolved).unwrap();
        assert_eq!(plan.templates.len(), 1);
        assert_eq!(plan.templates[0].key, "renamed");
    }
}
