use super::{AuthError, CredentialProvider, Credentials, LoginResponse, SecretString};
use crate::crd::auth::{AuthConfigSpec, AuthMethod, KubernetesAuthParams};
use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec, TokenRequestStatus};
use kube::api::{Api, PostParams};
use serde_json::json;

pub struct KubernetesProvider {
    role: String,
    mount: String,
    service_account: Option<String>,
    audiences: Vec<String>,
    token_expiration_seconds: i64,
}

impl KubernetesProvider {
    pub fn new(spec: &AuthConfigSpec) -> Result<Self, AuthError> {
        let params: &KubernetesAuthParams = spec
            .kubernetes
            .as_ref()
            .ok_or(AuthError::MissingField("kubernetes"))?;
        let role = params
            .role
            .clone()
            .ok_or(AuthError::MissingField("kubernetes.role"))?;
        Ok(Self {
            role,
            mount: spec
                .mount
                .clone()
                .unwrap_or_else(|| crate::constants::DEFAULT_AUTH_MOUNT.to_string()),
            service_account: params.service_account.clone(),
            audiences: params.audiences.clone(),
            token_expiration_seconds: params.token_expiration_seconds.unwrap_or(600),
        })
    }

    pub(crate) async fn project_token(
        &self,
        k8s_client: &kube::Client,
        namespace: &str,
    ) -> Result<String, AuthError> {
        let sa_name = self
            .service_account
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<k8s_openapi::api::core::v1::ServiceAccount> =
            Api::namespaced(k8s_client.clone(), namespace);

        let tr = TokenRequest {
            spec: TokenRequestSpec {
                audiences: Some(self.audiences.clone()),
                expiration_seconds: Some(self.token_expiration_seconds),
                bound_object_ref: None,
            },
            status: None::<TokenRequestStatus>,
            ..Default::default()
        };
        let body = serde_json::to_vec(&tr).map_err(|e| AuthError::LoginFailed(e.to_string()))?;

        let response: TokenRequest = api
            .create_subresource("token", &sa_name, &PostParams::default(), body)
            .await
            .map_err(AuthError::Kube)?;

        response
            .status
            .map(|s| s.token)
            .ok_or_else(|| AuthError::LoginFailed("token request returned no status".into()))
    }
}

#[async_trait]
impl CredentialProvider for KubernetesProvider {
    async fn init(&self, k8s_client: &kube::Client, namespace: &str) -> Result<String, AuthError> {
        let sa_name = self.service_account.as_deref().unwrap_or("default");
        let api: Api<k8s_openapi::api::core::v1::ServiceAccount> =
            Api::namespaced(k8s_client.clone(), namespace);
        let sa = api.get(sa_name).await.map_err(AuthError::Kube)?;
        let uid = sa.metadata.uid.unwrap_or_default();
        // The UID of the referenced ServiceAccount, not its name, is what
        // makes this identity stable across a delete/recreate of the same
        // name with different backing credentials.
        Ok(format!("kubernetes:{}:{namespace}:{uid}:{}", self.mount, self.role))
    }

    async fn get_creds(
        &self,
        k8s_client: &kube::Client,
        http: &reqwest::Client,
        authority_addr: &str,
        namespace: &str,
    ) -> Result<Credentials, AuthError> {
        let jwt = self.project_token(k8s_client, namespace).await?;

        let url = format!("{authority_addr}/v1/auth/{}/login", self.mount);
        let resp = http
            .post(url)
            .json(&json!({ "role": self.role, "jwt": jwt }))
            .send()
            .await?
            .error_for_status()?;
        let body: super::LoginResponse = resp.json().await?;
        Ok(Credentials {
            token: SecretString::new(body.auth.client_token),
            lease_duration_secs: body.auth.lease_duration,
            renewable: body.auth.renewable,
        })
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::Kubernetes
    }
}
