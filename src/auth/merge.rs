use crate::crd::auth::{AuthConfigSpec, AuthMethod, GlobalAuthDefaultSpec};

/// Pull the per-method `mount` override (if any) out of whichever provider
/// block `method` names, from either an AC or a GAD.
fn provider_mount(spec: &AuthConfigSpec, method: AuthMethod) -> Option<String> {
    match method {
        AuthMethod::Kubernetes => spec.kubernetes.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::Jwt => spec.jwt.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::AppRole => spec.app_role.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::Aws => spec.aws.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::Gcp => spec.gcp.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::ServicePrincipal => spec.service_principal.as_ref().and_then(|p| p.mount.clone()),
    }
}

fn gad_provider_mount(gad: &GlobalAuthDefaultSpec, method: AuthMethod) -> Option<String> {
    match method {
        AuthMethod::Kubernetes => gad.kubernetes.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::Jwt => gad.jwt.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::AppRole => gad.app_role.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::Aws => gad.aws.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::Gcp => gad.gcp.as_ref().and_then(|p| p.mount.clone()),
        AuthMethod::ServicePrincipal => gad.service_principal.as_ref().and_then(|p| p.mount.clone()),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

/// Fill every empty field of `ac` from `gad`. Per spec.md §3, each field is
/// resolved independently as the first non-empty of (AC explicit, provider
/// block in GAD, GAD top-level default); there is no per-field mixing within
/// a single method-specific params struct — whichever side (AC or GAD)
/// supplies it wins that struct wholesale, except `mount`, which is always
/// resolved through the three-tier rule above since it can live at either
/// the AC/GAD top level or inside a provider block.
#[must_use]
pub fn merge_with_defaults(
    ac: &AuthConfigSpec,
    gad: Option<&GlobalAuthDefaultSpec>,
) -> AuthConfigSpec {
    let Some(gad) = gad else {
        return ac.clone();
    };

    let mut merged = ac.clone();
    merged.method = merged.method.or(gad.default_method);

    if let Some(method) = merged.method {
        merged.mount = non_empty(merged.mount.clone())
            .or_else(|| non_empty(provider_mount(ac, method)))
            .or_else(|| non_empty(gad_provider_mount(gad, method)))
            .or_else(|| non_empty(gad.default_mount.clone()));
    } else {
        merged.mount = non_empty(merged.mount.clone()).or_else(|| non_empty(gad.default_mount.clone()));
    }

    merged.namespace = non_empty(merged.namespace.clone()).or_else(|| non_empty(gad.default_namespace.clone()));
    if merged.headers.is_empty() {
        merged.headers = gad.headers.clone();
    }
    merged.kubernetes = merged.kubernetes.clone().or_else(|| gad.kubernetes.clone());
    merged.jwt = merged.jwt.clone().or_else(|| gad.jwt.clone());
    merged.app_role = merged.app_role.clone().or_else(|| gad.app_role.clone());
    merged.aws = merged.aws.clone().or_else(|| gad.aws.clone());
    merged.gcp = merged.gcp.clone().or_else(|| gad.gcp.clone());
    merged.service_principal = merged
        .service_principal
        .clone()
        .or_else(|| gad.service_principal.clone());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::auth::{AppRoleAuthParams, AuthMethod};

    fn empty_ac() -> AuthConfigSpec {
        AuthConfigSpec {
            method: None,
            mount: None,
            namespace: None,
            allowed_namespaces: None,
            headers: Default::default(),
            kubernetes: None,
            jwt: None,
            app_role: None,
            aws: None,
            gcp: None,
            service_principal: None,
        }
    }

    fn empty_gad() -> GlobalAuthDefaultSpec {
        GlobalAuthDefaultSpec {
            default_method: None,
            default_mount: None,
            default_namespace: None,
            headers: Default::default(),
            kubernetes: None,
            jwt: None,
            app_role: None,
            aws: None,
            gcp: None,
            service_principal: None,
        }
    }

    #[test]
    fn ac_value_wins_over_default() {
        let mut ac = empty_ac();
        ac.method = Some(AuthMethod::Jwt);
        let mut gad = empty_gad();
        gad.default_method = Some(AuthMethod::Kubernetes);
        gad.default_mount = Some("custom-mount".to_string());

        let merged = merge_with_defaults(&ac, Some(&gad));
        assert_eq!(merged.method, Some(AuthMethod::Jwt));
        assert_eq!(merged.mount.as_deref(), Some("custom-mount"));
    }

    #[test]
    fn missing_fields_fall_back_to_default() {
        let ac = empty_ac();
        let mut gad = empty_gad();
        gad.default_method = Some(AuthMethod::Aws);
        gad.default_mount = Some("aws".to_string());

        let merged = merge_with_defaults(&ac, Some(&gad));
        assert_eq!(merged.method, Some(AuthMethod::Aws));
        assert_eq!(merged.mount.as_deref(), Some("aws"));
    }

    /// S3 from spec.md §9: AC has `mount=""`, `appRole.params={x:1}`; GAD has
    /// `defaultMount="auth/k8s"` plus a provider block with
    /// `mount="auth/k8s-2"` and its own params. Expected: resolved
    /// `mount="auth/k8s-2"` (provider block beats top-level default), and the
    /// AC's own `appRole` params struct wins wholesale over the GAD's.
    #[test]
    fn provider_block_mount_wins_over_gad_top_level_default() {
        let mut ac = empty_ac();
        ac.method = Some(AuthMethod::AppRole);
        ac.mount = Some(String::new());
        ac.app_role = Some(AppRoleAuthParams {
            mount: None,
            role_id: "x".to_string(),
            secret_id_ref: "x-secret".to_string(),
        });

        let mut gad = empty_gad();
        gad.default_mount = Some("auth/k8s".to_string());
        gad.app_role = Some(AppRoleAuthParams {
            mount: Some("auth/k8s-2".to_string()),
            role_id: "y".to_string(),
            secret_id_ref: "y-secret".to_string(),
        });

        let merged = merge_with_defaults(&ac, Some(&gad));
        assert_eq!(merged.mount.as_deref(), Some("auth/k8s-2"));
        assert_eq!(merged.app_role.unwrap().role_id, "x");
    }
}
