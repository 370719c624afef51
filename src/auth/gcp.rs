use super::{AuthError, CredentialProvider, Credentials, LoginResponse, SecretString};
use crate::crd::auth::{AuthConfigSpec, AuthMethod, GcpAuthParams};
use async_trait::async_trait;
use serde_json::json;

/// GCP workload-identity login: fetch a signed JWT from the GCE metadata
/// server's `identity` endpoint for the service account impersonated by the
/// pod, then exchange it with the authority.
pub struct GcpProvider {
    role: String,
    mount: String,
    service_account: String,
}

const METADATA_IDENTITY_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity";

impl GcpProvider {
    pub fn new(spec: &AuthConfigSpec) -> Result<Self, AuthError> {
        let params: &GcpAuthParams = spec.gcp.as_ref().ok_or(AuthError::MissingField("gcp"))?;
        Ok(Self {
            role: params.role.clone().ok_or(AuthError::MissingField("gcp.role"))?,
            mount: spec.mount.clone().unwrap_or_else(|| "gcp".to_string()),
            service_account: params.service_account.clone(),
        })
    }

    async fn fetch_identity_jwt(&self, http: &reqwest::Client) -> Result<String, AuthError> {
        let url = format!("{METADATA_IDENTITY_URL}?audience={}&format=full", self.mount);
        let resp = http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?;
        resp.text().await.map_err(AuthError::from)
    }
}

#[async_trait]
impl CredentialProvider for GcpProvider {
    async fn init(&self, _k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError> {
        Ok(format!(
            "gcp:{}:{namespace}:{}:{}",
            self.mount, self.service_account, self.role
        ))
    }

    async fn get_creds(
        &self,
        _k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        _namespace: &str,
    ) -> Result<Credentials, AuthError> {
        let jwt = self.fetch_identity_jwt(http).await?;

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
        AuthMethod::Gcp
    }
}
