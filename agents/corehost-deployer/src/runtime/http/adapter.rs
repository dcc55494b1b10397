//! HTTP Control Plane Adapter
//!
//! Implementation of the service traits against the control plane REST API
//! using reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::ControlPlaneConfig;
use crate::deploy::invoke::EVENT_STREAM;
use crate::error::ServiceError;
use crate::runtime::adapter::{
    AgentRuntime, IdentityHandle, IdentityService, LaunchRequest, LaunchResult, PolicyDocument,
    RawResponse, RuntimeStatus, ServiceResult, WorkloadService,
};
use crate::runtime::http::protocol::{
    parse_envelope, status_error, CreateIdentityBody, InvokeBody, LaunchBody, PolicyListBody,
    PutPolicyBody, RuntimeStatusBody,
};

/// Header carrying the target region on every request
pub const REGION_HEADER: &str = "x-corehost-region";

/// Control plane client
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        region: &str,
        timeout: Duration,
    ) -> ServiceResult<Self> {
        let invalid = |e: reqwest::header::InvalidHeaderValue| {
            ServiceError::Transport(format!("invalid header value: {}", e))
        };

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key)).map_err(invalid)?,
            );
        }
        headers.insert(REGION_HEADER, HeaderValue::from_str(region).map_err(invalid)?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from the control plane section of the config
    pub fn from_config(config: &ControlPlaneConfig, region: &str) -> ServiceResult<Self> {
        Self::new(
            &config.url,
            config.api_key.as_deref(),
            region,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Send a management request and unwrap its envelope
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> ServiceResult<Option<T>> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(operation = %what, status = %status, "Control plane responded");
        parse_envelope(status, &body, what)
    }

    async fn send_data<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> ServiceResult<T> {
        self.send(request, what)
            .await?
            .ok_or_else(|| ServiceError::Transport(format!("empty response to {}", what)))
    }

    async fn send_ack(&self, request: RequestBuilder, what: &str) -> ServiceResult<()> {
        self.send::<serde_json::Value>(request, what).await.map(|_| ())
    }
}

#[async_trait]
impl IdentityService for HttpControlPlane {
    async fn create_identity(
        &self,
        name: &str,
        description: &str,
        trust_policy: &PolicyDocument,
    ) -> ServiceResult<IdentityHandle> {
        let body = CreateIdentityBody {
            name: name.to_string(),
            description: description.to_string(),
            trust_policy: trust_policy.clone(),
        };
        let request = self.client.post(self.url("/identities")).json(&body);
        self.send_data(request, "create identity").await
    }

    async fn put_policy(
        &self,
        identity: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> ServiceResult<()> {
        let body = PutPolicyBody {
            document: document.clone(),
        };
        let request = self
            .client
            .put(self.url(&format!("/identities/{}/policies/{}", identity, policy_name)))
            .json(&body);
        self.send_ack(request, "put policy").await
    }

    async fn list_policies(&self, identity: &str) -> ServiceResult<Vec<String>> {
        let request = self
            .client
            .get(self.url(&format!("/identities/{}/policies", identity)));
        let body: PolicyListBody = self.send_data(request, "list policies").await?;
        Ok(body.policies)
    }

    async fn delete_policy(&self, identity: &str, policy_name: &str) -> ServiceResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/identities/{}/policies/{}", identity, policy_name)));
        self.send_ack(request, "delete policy").await
    }

    async fn delete_identity(&self, name: &str) -> ServiceResult<()> {
        let request = self.client.delete(self.url(&format!("/identities/{}", name)));
        self.send_ack(request, "delete identity").await
    }
}

#[async_trait]
impl WorkloadService for HttpControlPlane {
    async fn launch(&self, request: LaunchRequest) -> ServiceResult<LaunchResult> {
        let body = LaunchBody::from(request);
        let request = self.client.post(self.url("/runtimes")).json(&body);
        self.send_data(request, "launch runtime").await
    }

    async fn get_status(&self, runtime_id: &str) -> ServiceResult<RuntimeStatus> {
        let request = self.client.get(self.url(&format!("/runtimes/{}", runtime_id)));
        let body: RuntimeStatusBody = self.send_data(request, "get runtime status").await?;
        Ok(body.status)
    }

    async fn delete_runtime(&self, runtime_id: &str) -> ServiceResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/runtimes/{}", runtime_id)));
        self.send_ack(request, "delete runtime").await
    }

    async fn delete_repository(&self, name: &str, force: bool) -> ServiceResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/repositories/{}", name)))
            .query(&[("force", force)]);
        self.send_ack(request, "delete repository").await
    }
}

#[async_trait]
impl AgentRuntime for HttpControlPlane {
    async fn invoke(
        &self,
        runtime_ref: &str,
        qualifier: &str,
        payload: &serde_json::Value,
    ) -> ServiceResult<RawResponse> {
        let body = InvokeBody {
            runtime_ref: runtime_ref.to_string(),
            payload: payload.clone(),
        };
        let mut response = self
            .client
            .post(self.url("/runtimes/invocations"))
            .query(&[("qualifier", qualifier)])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            return Err(parse_envelope::<serde_json::Value>(status, &text, runtime_ref)
                .err()
                .unwrap_or_else(|| status_error(status, runtime_ref)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        // Only an event stream is consumed chunk by chunk; any other body is one event.
        let mut events = Vec::new();
        match content_type.as_deref() {
            Some(ct) if ct.contains(EVENT_STREAM) => {
                while let Some(chunk) = response.chunk().await? {
                    debug!(bytes = chunk.len(), "Invocation chunk received");
                    events.push(chunk.to_vec());
                }
            }
            _ => {
                let body = response.bytes().await?;
                debug!(bytes = body.len(), "Invocation body received");
                events.push(body.to_vec());
            }
        }

        Ok(RawResponse {
            content_type,
            events,
        })
    }
}
