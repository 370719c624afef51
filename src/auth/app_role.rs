use super::{AuthError, CredentialProvider, Credentials, LoginResponse, SecretString};
use crate::crd::auth::{AppRoleAuthParams, AuthConfigSpec, AuthMethod};
use async_trait::async_trait;
use kube::api::Api;
use serde_json::json;

pub struct AppRoleProvider {
    role_id: String,
    secret_id_ref: String,
    mount: String,
}

impl AppRoleProvider {
    pub fn new(spec: &AuthConfigSpec) -> Result<Self, AuthError> {
        let params: &AppRoleAuthParams = spec
            .app_role
            .as_ref()
            .ok_or(AuthError::MissingField("appRole"))?;
        Ok(Self {
            role_id: params.role_id.clone(),
            secret_id_ref: params.secret_id_ref.clone(),
            mount: spec
                .mount
                .clone()
                .unwrap_or_else(|| "approle".to_string()),
        })
    }

    async fn resolve_secret_id(
        &self,
        k8s_client: &kube::Client,
        namespace: &str,
    ) -> Result<String, AuthError> {
        let api: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(k8s_client.clone(), namespace);
        let secret = api.get(&self.secret_id_ref).await.map_err(AuthError::Kube)?;
        let data = secret.data.ok_or_else(|| {
            AuthError::LoginFailed(format!("secret {} has no data", self.secret_id_ref))
        })?;
        let bytes = data.get("secret_id").ok_or_else(|| {
            AuthError::LoginFailed(format!(
                "secret {} has no secret_id key",
                self.secret_id_ref
            ))
        })?;
        Ok(String::from_utf8_lossy(&bytes.0).into_owned())
    }
}

#[async_trait]
impl CredentialProvider for AppRoleProvider {
    async fn init(&self, k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError> {
        let api: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(k8s_client.clone(), namespace);
        let uid = api
            .get(&self.secret_id_ref)
            .await
            .map_err(AuthError::Kube)?
            .metadata
            .uid
            .unwrap_or_default();
        Ok(format!("appRole:{}:{namespace}:{uid}", self.mount))
    }

    async fn get_creds(
        &self,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) -> Result<Credentials, AuthError> {
        let secret_id = self.resolve_secret_id(k8s_client, namespace).await?;

        let url = format!("{authority_addr}/v1/auth/{}/login", self.mount);
        let resp = http
            .post(url)
            .json(&json!({ "role_id": self.role_id, "secret_id": secret_id }))
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
        AuthMethod::AppRole
    }
}
