//! Wire Protocol
//!
//! Request and response bodies exchanged with the control plane API.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::runtime::adapter::{LaunchRequest, PolicyDocument, RuntimeStatus};

/// Error code the control plane uses for missing resources
pub const NOT_FOUND_CODE: &str = "NOT_FOUND";

/// Envelope wrapped around every management response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Map an API error to a service error, honouring the HTTP status
    pub fn into_service_error(self, status: StatusCode) -> ServiceError {
        if self.code == NOT_FOUND_CODE || status == StatusCode::NOT_FOUND {
            ServiceError::NotFound(self.message)
        } else {
            ServiceError::Rejected {
                code: self.code,
                message: self.message,
            }
        }
    }
}

/// Service error for a response that carried no usable error body
pub fn status_error(status: StatusCode, what: &str) -> ServiceError {
    if status == StatusCode::NOT_FOUND {
        ServiceError::NotFound(what.to_string())
    } else {
        ServiceError::rejected(
            format!("HTTP_{}", status.as_u16()),
            format!("{} failed with status {}", what, status),
        )
    }
}

/// Decode an envelope body, returning its data on success
pub fn parse_envelope<T>(status: StatusCode, body: &str, what: &str) -> Result<Option<T>, ServiceError>
where
    T: serde::de::DeserializeOwned,
{
    match serde_json::from_str::<ApiResponse<T>>(body) {
        Ok(envelope) if envelope.success && status.is_success() => Ok(envelope.data),
        Ok(envelope) => Err(match envelope.error {
            Some(error) => error.into_service_error(status),
            None => status_error(status, what),
        }),
        Err(e) if status.is_success() => Err(ServiceError::Transport(format!(
            "malformed response to {}: {}",
            what, e
        ))),
        Err(_) => Err(status_error(status, what)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateIdentityBody {
    pub name: String,
    pub description: String,
    pub trust_policy: PolicyDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutPolicyBody {
    pub document: PolicyDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyListBody {
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchBody {
    pub agent_name: String,
    pub region: String,
    pub execution_role_arn: String,
    pub entrypoint: String,
    pub package: String,
    pub package_digest: String,
    pub image_tag: String,
    pub auto_create_repository: bool,
}

impl From<LaunchRequest> for LaunchBody {
    fn from(request: LaunchRequest) -> Self {
        Self {
            agent_name: request.agent_name,
            region: request.region,
            execution_role_arn: request.execution_role_arn,
            entrypoint: request.entrypoint,
            package: request.package,
            package_digest: request.package_digest,
            image_tag: request.image_tag,
            auto_create_repository: request.auto_create_repository,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatusBody {
    pub runtime_id: String,
    pub status: RuntimeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeBody {
    pub runtime_ref: String,
    pub payload: serde_json::Value,
}
