//! End-to-end transform pipeline tests: `build_plan` followed by `apply`,
//! covering cross-namespace references, renames, and filter precedence
//! the way a real destination's `transformation` block would exercise them.

use serde_json::json;
use std::collections::BTreeMap;
use vso::crd::transformation::{
    InlineTransformation, TemplateRef, Transformation, TransformationRef, TransformationSpec,
};
use vso::transform::{apply, build_plan, RegexCache};

fn shared(name: &str, templates: &[(&str, &str)], excludes: &[&str], includes: &[&str]) -> Transformation {
    Transformation::new(
        name,
        TransformationSpec {
            templates: templates.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            source_templates: vec![],
            excludes: excludes.iter().map(|s| s.to_string()).collect(),
            includes: includes.iter().map(|s| s.to_string()).collect(),
        },
    )
}

#[test]
fn cross_namespace_reference_merges_templates_and_filters() {
    let mut resolved = BTreeMap::new();
    resolved.insert(
        "vault-system/shared-db".to_string(),
        shared("shared-db", &[("DB_URL", "{{ .Secrets.url }}")], &["^internal_.*"], &[]),
    );

    let mut inline = InlineTransformation::default();
    inline.templates.insert("API_KEY".to_string(), "{{ .Secrets.api_key }}".to_string());
    inline.transformation_refs.push(TransformationRef {
        name: "shared-db".to_string(),
        namespace: Some("vault-system".to_string()),
        template_refs: vec![],
        ignore_excludes: false,
        ignore_includes: false,
    });

    let plan = build_plan(&inline, &resolved).expect("plan should build");
    assert_eq!(plan.excludes, vec!["^internal_.*".to_string()]);

    let mut raw = BTreeMap::new();
    raw.insert("url".to_string(), json!("postgres://db"));
    raw.insert("api_key".to_string(), json!("sk-123"));
    raw.insert("internal_debug".to_string(), json!("should-be-filtered"));

    let cache = RegexCache::new(16);
    let out = apply(&plan, &raw, &cache).expect("apply should succeed");

    assert_eq!(out.get("DB_URL").unwrap(), b"postgres://db");
    assert_eq!(out.get("API_KEY").unwrap(), b"sk-123");
    // The excluded key never reaches a template, but it does still appear in
    // the raw envelope: excludes only gate what templates can see.
    assert!(out.contains_key(vso::constants::RAW_DATA_KEY));
}

#[test]
fn template_ref_rename_and_ignore_excludes_combine() {
    let mut resolved = BTreeMap::new();
    resolved.insert(
        "ns/creds".to_string(),
        shared("creds", &[("username", "{{ .Secrets.user }}")], &["^user$"], &[]),
    );

    let mut inline = InlineTransformation::default();
    inline.exclude_raw = true;
    inline.transformation_refs.push(TransformationRef {
        name: "creds".to_string(),
        namespace: Some("ns".to_string()),
        template_refs: vec![TemplateRef {
            name: "username".to_string(),
            key_override: Some("DB_USER".to_string()),
        }],
        ignore_excludes: true,
        ignore_includes: false,
    });

    let plan = build_plan(&inline, &resolved).expect("plan should build");
    assert!(plan.excludes.is_empty(), "ignoreExcludes should drop the referenced excludes");
    assert_eq!(plan.templates.len(), 1);
    assert_eq!(plan.templates[0].key, "DB_USER");

    let mut raw = BTreeMap::new();
    raw.insert("user".to_string(), json!("app"));

    let cache = RegexCache::new(16);
    let out = apply(&plan, &raw, &cache).expect("apply should succeed");

    assert_eq!(out.get("DB_USER").unwrap(), b"app");
    assert!(!out.contains_key(vso::constants::RAW_DATA_KEY));
}

#[test]
fn duplicate_template_name_across_sources_is_rejected() {
    let mut resolved = BTreeMap::new();
    resolved.insert(
        "ns/override".to_string(),
        shared("override", &[("TOKEN", "{{ .Secrets.token }}")], &[], &[]),
    );

    let mut inline = InlineTransformation::default();
    inline.templates.insert("TOKEN".to_string(), "inline-value-should-be-replaced".to_string());
    inline.transformation_refs.push(TransformationRef {
        name: "override".to_string(),
        namespace: Some("ns".to_string()),
        template_refs: vec![],
        ignore_excludes: false,
        ignore_includes: false,
    });

    let err = build_plan(&inline, &resolved).expect_err("colliding key across sources must be an error");
    assert!(matches!(err, vso::transform::PlanError::DuplicateTemplateKey { key } if key == "TOKEN"));
}

#[test]
fn includes_narrow_to_only_matching_keys_even_across_sources() {
    let mut resolved = BTreeMap::new();
    resolved.insert(
        "ns/extra".to_string(),
        shared("extra", &[("EXTRA", "{{ .Secrets.extra }}")], &[], &["^extra$"]),
    );

    let mut inline = InlineTransformation::default();
    inline.templates.insert("MAIN".to_string(), "{{ .Secrets.main }}".to_string());
    inline.transformation_refs.push(TransformationRef {
        name: "extra".to_string(),
        namespace: Some("ns".to_string()),
        template_refs: vec![],
        ignore_excludes: false,
        ignore_includes: false,
    });

    let plan = build_plan(&inline, &resolved).expect("plan should build");
    assert_eq!(plan.includes, vec!["^extra$".to_string()]);

    let mut raw = BTreeMap::new();
    raw.insert("main".to_string(), json!("main-value"));
    raw.insert("extra".to_string(), json!("extra-value"));

    let cache = RegexCache::new(16);
    // The include filter applies to the whole rendering context, not just
    // the destination keys a particular source contributed: `MAIN`'s
    // template references `.Secrets.main`, which the merged include list
    // has stripped out entirely, so rendering it fails outright.
    let err = apply(&plan, &raw, &cache).unwrap_err();
    assert!(matches!(err, vso::transform::TransformError::Render { ref key, .. } if key == "MAIN"));
}
