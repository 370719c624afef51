use super::{AuthError, CredentialProvider, Credentials, LoginResponse, SecretString};
use crate::crd::auth::{AuthConfigSpec, AuthMethod, ServicePrincipalAuthParams};
use async_trait::async_trait;
use kube::api::Api;
use serde_json::json;

/// Used by the App managed-secret-resource kind to authenticate against an
/// external secret manager integration via a client id/secret pair.
pub struct ServicePrincipalProvider {
    secret_ref: String,
    mount: String,
}

impl ServicePrincipalProvider {
    pub fn new(spec: &AuthConfigSpec) -> Result<Self, AuthError> {
        let params: &ServicePrincipalAuthParams = spec
            .service_principal
            .as_ref()
            .ok_or(AuthError::MissingField("servicePrincipal"))?;
        Ok(Self {
            secret_ref: params.secret_ref.clone(),
            mount: spec
                .mount
                .clone()
                .unwrap_or_else(|| "servicePrincipal".to_string()),
        })
    }

    async fn resolve_client_creds(
        &self,
        k8s_client: &kube::Client,
        namespace: &str,
    ) -> Result<(String, String), AuthError> {
        let api: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(k8s_client.clone(), namespace);
        let secret = api.get(&self.secret_ref).await.map_err(AuthError::Kube)?;
        let data = secret.data.ok_or_else(|| {
            AuthError::LoginFailed(format!("secret {} has no data", self.secret_ref))
        })?;
        let client_id = data.get("client_id").ok_or_else(|| {
            AuthError::LoginFailed(format!("secret {} has no client_id", self.secret_ref))
        })?;
        let client_secret = data.get("client_secret").ok_or_else(|| {
            AuthError::LoginFailed(format!("secret {} has no client_secret", self.secret_ref))
        })?;
        Ok((
            String::from_utf8_lossy(&client_id.0).into_owned(),
            String::from_utf8_lossy(&client_secret.0).into_owned(),
        ))
    }
}

#[async_trait]
impl CredentialProvider for ServicePrincipalProvider {
    async fn init(&self, k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError> {
        let api: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(k8s_client.clone(), namespace);
        let uid = api
            .get(&self.secret_ref)
            .await
            .map_err(AuthError::Kube)?
            .metadata
            .uid
            .unwrap_or_default();
        Ok(format!("servicePrincipal:{}:{namespace}:{uid}", self.mount))
    }

    async fn get_creds(
        &self,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) -> Result<Credentials, AuthError> {
        let (client_id, client_secret) = self.resolve_client_creds(k8s_client, namespace).await?;

        let url = format!("{authority_addr}/v1/auth/{}/login", self.mount);
        let resp = http
            .post(url)
            .json(&json!({ "client_id": client_id, "client_secret": client_secret }))
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
        AuthMethod::ServicePrincipal
    }
}
