//! CRD validation tests: deserialize representative YAML manifests for
//! every kind this operator owns, to catch schema drift early.

use vso::crd::auth::{AuthConfigSpec, AuthMethod, GlobalAuthDefaultSpec};
use vso::crd::msr::{AppSecretSpec, DynamicSecretSpec, PkiSecretSpec, StaticSecretSpec};
use vso::crd::transformation::TransformationSpec;

#[test]
fn static_secret_minimal_spec_defaults_everything_else() {
    let yaml = r#"
mount: secret
path: apps/my-app/config
destination:
  name: my-app-config
  create: true
"#;
    let spec: StaticSecretSpec = serde_yaml::from_str(yaml).expect("minimal StaticSecretSpec should deserialize");
    assert_eq!(spec.mount, "secret");
    assert!(spec.auth_ref.is_none());
    assert!(spec.version.is_none());
    assert_eq!(spec.destination.r#type, "Opaque");
    assert!(spec.destination.prune_orphans);
}

#[test]
fn static_secret_full_spec_round_trips() {
    let yaml = r#"
authRef:
  namespace: vault-system
  name: team-a
mount: secret
path: apps/my-app/config
version: 3
refreshAfter: 30m
destination:
  name: my-app-config
  create: true
  overwrite: true
  type: Opaque
  labels:
    team: platform
  annotations:
    app: my-app
  deleteOnFinalize: true
  pruneOrphans: false
  transformation:
    templates:
      DATABASE_URL: "postgres://{{ .user }}:{{ .password }}@{{ .host }}/{{ .db }}"
    excludes:
      - "^internal_.*"
    excludeRaw: true
  rolloutRestartTargets:
    - kind: Deployment
      name: my-app
"#;
    let spec: StaticSecretSpec = serde_yaml::from_str(yaml).expect("full StaticSecretSpec should deserialize");
    assert_eq!(spec.version, Some(3));
    assert_eq!(spec.refresh_after.as_deref(), Some("30m"));
    assert_eq!(spec.auth_ref.unwrap().name.as_deref(), Some("team-a"));
    assert!(!spec.destination.prune_orphans);
    assert_eq!(spec.destination.rollout_restart_targets.len(), 1);
    assert!(spec.destination.transformation.exclude_raw);
}

#[test]
fn dynamic_secret_defaults_renewal_percent() {
    let yaml = r#"
mount: database
path: creds/readonly
destination:
  name: db-creds
  create: true
"#;
    let spec: DynamicSecretSpec = serde_yaml::from_str(yaml).expect("DynamicSecretSpec should deserialize");
    assert!((spec.renewal_percent - vso::constants::DEFAULT_RENEWAL_PERCENT).abs() < f64::EPSILON);
    assert!(!spec.revoke);
    assert!(!spec.allow_static_creds);
}

#[test]
fn pki_secret_defaults_pem_format() {
    let yaml = r#"
mount: pki
role: my-app
commonName: my-app.svc.cluster.local
destination:
  name: my-app-tls
  create: true
  type: kubernetes.io/tls
"#;
    let spec: PkiSecretSpec = serde_yaml::from_str(yaml).expect("PkiSecretSpec should deserialize");
    assert_eq!(spec.format, "pem");
    assert_eq!(spec.destination.r#type, "kubernetes.io/tls");
    assert!(spec.alt_names.is_empty());
}

#[test]
fn app_secret_requires_app_name() {
    let yaml = r#"
appName: my-integration
destination:
  name: my-integration-secret
  create: true
"#;
    let spec: AppSecretSpec = serde_yaml::from_str(yaml).expect("AppSecretSpec should deserialize");
    assert_eq!(spec.app_name, "my-integration");
}

#[test]
fn auth_config_kubernetes_method_round_trips() {
    let yaml = r#"
method: kubernetes
mount: kubernetes
allowedNamespaces:
  - "*"
kubernetes:
  role: my-app-role
  serviceAccount: my-app
  audiences:
    - vault
"#;
    let spec: AuthConfigSpec = serde_yaml::from_str(yaml).expect("AuthConfigSpec should deserialize");
    assert_eq!(spec.method, Some(AuthMethod::Kubernetes));
    assert_eq!(spec.allowed_namespaces, Some(vec!["*".to_string()]));
    assert_eq!(spec.kubernetes.unwrap().role.as_deref(), Some("my-app-role"));
}

#[test]
fn global_auth_default_merges_headers() {
    let yaml = r#"
defaultMethod: appRole
defaultMount: approle
headers:
  X-Vault-Namespace: platform
"#;
    let spec: GlobalAuthDefaultSpec = serde_yaml::from_str(yaml).expect("GlobalAuthDefaultSpec should deserialize");
    assert_eq!(spec.default_method, Some(AuthMethod::AppRole));
    assert_eq!(spec.headers.get("X-Vault-Namespace").map(String::as_str), Some("platform"));
}

#[test]
fn transformation_object_with_multiple_templates_round_trips() {
    let yaml = r#"
templates:
  USERNAME: "{{ .username }}"
  PASSWORD: "{{ .password }}"
sourceTemplates:
  - name: fullUrl
    template: "postgres://{{ .username }}:{{ .password }}@{{ .host }}"
includes:
  - "^(username|password)$"
"#;
    let spec: TransformationSpec = serde_yaml::from_str(yaml).expect("TransformationSpec should deserialize");
    assert_eq!(spec.templates.len(), 2);
    assert_eq!(spec.source_templates.len(), 1);
    assert_eq!(spec.includes, vec!["^(username|password)$".to_string()]);
}
