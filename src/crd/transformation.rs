//! # Transformation objects and the common Destination block

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A referenced `Transformation` object, standalone so it can be shared
/// across many destinations.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Transformation",
    group = "secrets.vso.io",
    version = "v1alpha1",
    namespaced,
    status = "TransformationStatus",
    printcolumn = r#"{"name":"Valid", "type":"string", "jsonPath":".status.valid"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TransformationSpec {
    /// Named keyed templates: destination key -> Go-template-like body.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    /// Templates that are rendered (for side effects / inclusion by other
    /// templates) but never produce a destination key on their own.
    #[serde(default)]
    pub source_templates: Vec<SourceTemplate>,
    /// Regex patterns; matching raw keys are removed before `includes` is applied.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Regex patterns; when present, only matching raw keys survive.
    #[serde(default)]
    pub includes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceTemplate {
    pub name: String,
    pub template: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformationStatus {
    /// Whether this object's templates/filters all parsed successfully.
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// An inline reference to a `Transformation` object from a Destination block.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRef {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Only pull these named templates from the referenced object (empty = all).
    #[serde(default)]
    pub template_refs: Vec<TemplateRef>,
    #[serde(default)]
    pub ignore_excludes: bool,
    #[serde(default)]
    pub ignore_includes: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    pub name: String,
    /// Rename the destination key this template is keyed under.
    #[serde(default)]
    pub key_override: Option<String>,
}

/// Inline transformation block embedded directly in a Destination.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InlineTransformation {
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub transformation_refs: Vec<TransformationRef>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub exclude_raw: bool,
}

/// A workload to patch with a restart annotation after a successful sync.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloutRestartTarget {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Common Destination block embedded in every managed secret resource kind.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub name: String,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub overwrite: bool,
    /// Kubernetes Secret `type`. Defaults to `Opaque`.
    #[serde(default = "default_secret_type")]
    pub r#type: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub transformation: InlineTransformation,
    #[serde(default)]
    pub rollout_restart_targets: Vec<RolloutRestartTarget>,
    /// Delete the destination Secret when the owning MSR is deleted. Only
    /// meaningful when `create` is also true.
    #[serde(default)]
    pub delete_on_finalize: bool,
    /// List owned orphans and delete any whose name no longer matches
    /// `name`.
    #[serde(default = "default_true")]
    pub prune_orphans: bool,
}

fn default_secret_type() -> String {
    "Opaque".to_string()
}

fn default_true() -> bool {
    true
}
