use super::kubernetes::KubernetesProvider;
use super::{AuthError, CredentialProvider, Credentials, LoginResponse, SecretString};
use crate::crd::auth::{AuthConfigSpec, AuthMethod, JwtAuthParams};
use async_trait::async_trait;
use kube::api::Api;
use serde_json::json;

/// Exchanges either a static JWT pulled from a Secret, or a projected
/// ServiceAccount token (reusing the Kubernetes provider's projection path),
/// for an authority-issued client token.
pub struct JwtProvider {
    role: String,
    mount: String,
    secret_ref: Option<String>,
    service_account: Option<String>,
    audiences: Vec<String>,
}

impl JwtProvider {
    pub fn new(spec: &AuthConfigSpec) -> Result<Self, AuthError> {
        let params: &JwtAuthParams = spec.jwt.as_ref().ok_or(AuthError::MissingField("jwt"))?;
        if params.secret_ref.is_none() && params.service_account.is_none() {
            return Err(AuthError::MissingField("jwt.secretRef or jwt.serviceAccount"));
        }
        Ok(Self {
            role: params.role.clone().ok_or(AuthError::MissingField("jwt.role"))?,
            mount: spec
                .mount
                .clone()
                .unwrap_or_else(|| crate::constants::DEFAULT_AUTH_MOUNT.to_string()),
            secret_ref: params.secret_ref.clone(),
            service_account: params.service_account.clone(),
            audiences: params.audiences.clone(),
        })
    }

    async fn resolve_jwt(&self, k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError> {
        if let Some(secret_name) = &self.secret_ref {
            let api: Api<k8s_openapi::api::core::v1::Secret> =
                Api::namespaced(k8s_client.clone(), namespace);
            let secret = api.get(secret_name).await.map_err(AuthError::Kube)?;
            let data = secret.data.ok_or_else(|| {
                AuthError::LoginFailed(format!("secret {secret_name} has no data"))
            })?;
            let bytes = data
                .get("jwt")
                .ok_or_else(|| AuthError::LoginFailed(format!("secret {secret_name} has no jwt key")))?;
            return Ok(String::from_utf8_lossy(&bytes.0).into_owned());
        }

        let sa = self.service_account.clone().unwrap_or_default();
        let kp = KubernetesProvider::new(&AuthConfigSpec {
            method: Some(AuthMethod::Kubernetes),
            mount: Some(self.mount.clone()),
            namespace: None,
            allowed_namespaces: None,
            headers: Default::default(),
            kubernetes: Some(crate::crd::auth::KubernetesAuthParams {
                mount: None,
                role: Some(self.role.clone()),
                service_account: Some(sa),
                audiences: self.audiences.clone(),
                token_expiration_seconds: None,
            }),
            jwt: None,
            app_role: None,
            aws: None,
            gcp: None,
            service_principal: None,
        })?;
        kp.project_token(k8s_client, namespace).await
    }
}

#[async_trait]
impl CredentialProvider for JwtProvider {
    async fn init(&self, k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError> {
        let uid = if let Some(secret_name) = &self.secret_ref {
            let api: Api<k8s_openapi::api::core::v1::Secret> =
                Api::namespaced(k8s_client.clone(), namespace);
            api.get(secret_name).await.map_err(AuthError::Kube)?.metadata.uid.unwrap_or_default()
        } else if let Some(sa_name) = &self.service_account {
            let api: Api<k8s_openapi::api::core::v1::ServiceAccount> =
                Api::namespaced(k8s_client.clone(), namespace);
            api.get(sa_name).await.map_err(AuthError::Kube)?.metadata.uid.unwrap_or_default()
        } else {
            String::new()
        };
        Ok(format!("jwt:{}:{namespace}:{uid}", self.mount))
    }

    async fn get_creds(
        &self,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) -> Result<Credentials, AuthError> {
        let jwt = self.resolve_jwt(k8s_client, namespace).await?;

        let url = format!("{authority_addr}/v1/auth/{}/login", self.mount);
        let resp = http
            .post(url)
            .json(&json!({ "role": self.role, "jwt": jwt }))
            .send()
            .await?
            .error_for_status()?;
        let body: LoginResponse = resp.json().await?;
        Ok(Credentials {
            token: SecretString::new(body.auth.client_token),
            lease_duration_secs: body.auth.lease_duration,
            renewable: body.auth.renewable,
        })
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::Jwt
    }
}
