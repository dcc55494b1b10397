//! In-Memory Control Plane
//!
//! A complete fake of the identity, workload and agent runtime services.
//! Status sequences are scripted, any operation can be made to fail, and
//! deleting an absent resource reports not-found like the real services do.
//!
//! This backend keeps everything in process memory and is meant for tests
//! and rehearsals, not production use.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::ServiceError;
use crate::runtime::adapter::{
    AgentRuntime, IdentityHandle, IdentityService, LaunchRequest, LaunchResult, PolicyDocument,
    RawResponse, RuntimeStatus, ServiceResult, WorkloadService,
};

/// Operation that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateIdentity,
    PutPolicy,
    ListPolicies,
    DeletePolicy,
    DeleteIdentity,
    Launch,
    GetStatus,
    DeleteRuntime,
    DeleteRepository,
    Invoke,
}

#[derive(Debug)]
struct StoredIdentity {
    arn: String,
    trust_policy: PolicyDocument,
    policies: BTreeMap<String, PolicyDocument>,
}

#[derive(Debug)]
struct StoredRuntime {
    runtime_ref: String,
    script: VecDeque<RuntimeStatus>,
}

#[derive(Debug, Default)]
struct State {
    identities: BTreeMap<String, StoredIdentity>,
    runtimes: BTreeMap<String, StoredRuntime>,
    repositories: BTreeSet<String>,
    failures: HashMap<FailPoint, ServiceError>,
    status_script: Vec<RuntimeStatus>,
    response: Option<RawResponse>,
    launches: Vec<LaunchRequest>,
    invocations: Vec<(String, serde_json::Value)>,
    status_calls: u32,
}

/// In-process stand-in for the managed runtime service
#[derive(Debug)]
pub struct InMemoryControlPlane {
    region: String,
    account: String,
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            account: "000000000000".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Statuses returned by successive polls of newly launched runtimes.
    /// The last entry repeats; an empty script means immediately READY.
    pub fn with_status_script(self, script: Vec<RuntimeStatus>) -> Self {
        self.state.lock().status_script = script;
        self
    }

    /// Response returned by every invocation
    pub fn with_response(self, response: RawResponse) -> Self {
        self.state.lock().response = Some(response);
        self
    }

    /// Make `point` fail with `error` until cleared
    pub fn fail(&self, point: FailPoint, error: ServiceError) {
        self.state.lock().failures.insert(point, error);
    }

    pub fn clear_failure(&self, point: FailPoint) {
        self.state.lock().failures.remove(&point);
    }

    pub fn identity_exists(&self, name: &str) -> bool {
        self.state.lock().identities.contains_key(name)
    }

    pub fn identity_names(&self) -> Vec<String> {
        self.state.lock().identities.keys().cloned().collect()
    }

    /// Names of the permission documents attached to an identity
    pub fn policy_names(&self, identity: &str) -> Vec<String> {
        self.state
            .lock()
            .identities
            .get(identity)
            .map(|i| i.policies.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Trust statement an identity was created with
    pub fn trust_policy(&self, identity: &str) -> Option<PolicyDocument> {
        self.state
            .lock()
            .identities
            .get(identity)
            .map(|i| i.trust_policy.clone())
    }

    pub fn runtime_exists(&self, runtime_id: &str) -> bool {
        self.state.lock().runtimes.contains_key(runtime_id)
    }

    pub fn runtime_count(&self) -> usize {
        self.state.lock().runtimes.len()
    }

    pub fn repository_exists(&self, name: &str) -> bool {
        self.state.lock().repositories.contains(name)
    }

    /// Number of status queries served so far
    pub fn status_calls(&self) -> u32 {
        self.state.lock().status_calls
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state.lock().launches.clone()
    }

    /// `(runtime_ref, payload)` of every invocation
    pub fn invocations(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().invocations.clone()
    }

    fn check(state: &State, point: FailPoint) -> ServiceResult<()> {
        match state.failures.get(&point) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn repository_name(agent_name: &str) -> String {
        format!("corehost-{}", agent_name.to_lowercase().replace('_', "-"))
    }
}

#[async_trait]
impl IdentityService for InMemoryControlPlane {
    async fn create_identity(
        &self,
        name: &str,
        _description: &str,
        trust_policy: &PolicyDocument,
    ) -> ServiceResult<IdentityHandle> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::CreateIdentity)?;

        if state.identities.contains_key(name) {
            return Err(ServiceError::rejected(
                "EntityAlreadyExists",
                format!("identity {} already exists", name),
            ));
        }

        let arn = format!("arn:corehost:iam::{}:role/{}", self.account, name);
        state.identities.insert(
            name.to_string(),
            StoredIdentity {
                arn: arn.clone(),
                trust_policy: trust_policy.clone(),
                policies: BTreeMap::new(),
            },
        );

        Ok(IdentityHandle {
            name: name.to_string(),
            arn,
        })
    }

    async fn put_policy(
        &self,
        identity: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::PutPolicy)?;

        let stored = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| ServiceError::NotFound(format!("identity {}", identity)))?;
        stored
            .policies
            .insert(policy_name.to_string(), document.clone());
        Ok(())
    }

    async fn list_policies(&self, identity: &str) -> ServiceResult<Vec<String>> {
        let state = self.state.lock();
        Self::check(&state, FailPoint::ListPolicies)?;

        state
            .identities
            .get(identity)
            .map(|i| i.policies.keys().cloned().collect())
            .ok_or_else(|| ServiceError::NotFound(format!("identity {}", identity)))
    }

    async fn delete_policy(&self, identity: &str, policy_name: &str) -> ServiceResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::DeletePolicy)?;

        let stored = state
            .identities
            .get_mut(identity)
            .ok_or_else(|| ServiceError::NotFound(format!("identity {}", identity)))?;
        stored
            .policies
            .remove(policy_name)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("policy {}", policy_name)))
    }

    async fn delete_identity(&self, name: &str) -> ServiceResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::DeleteIdentity)?;

        match state.identities.get(name) {
            None => Err(ServiceError::NotFound(format!("identity {}", name))),
            Some(identity) if !identity.policies.is_empty() => Err(ServiceError::rejected(
                "DeleteConflict",
                "identity still has attached policies",
            )),
            Some(_) => {
                state.identities.remove(name);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl WorkloadService for InMemoryControlPlane {
    async fn launch(&self, request: LaunchRequest) -> ServiceResult<LaunchResult> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::Launch)?;

        if request.entrypoint.is_empty() {
            return Err(ServiceError::rejected(
                "ValidationException",
                "entrypoint must not be empty",
            ));
        }
        if !state
            .identities
            .values()
            .any(|i| i.arn == request.execution_role_arn)
        {
            return Err(ServiceError::rejected(
                "AccessDeniedException",
                format!("cannot assume {}", request.execution_role_arn),
            ));
        }

        let repository = Self::repository_name(&request.agent_name);
        if !request.auto_create_repository && !state.repositories.contains(&repository) {
            return Err(ServiceError::NotFound(format!("repository {}", repository)));
        }
        state.repositories.insert(repository.clone());

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let runtime_id = format!("{}-{}", request.agent_name, &suffix[..10]);
        let runtime_ref = format!(
            "arn:corehost:runtime:{}:{}:runtime/{}",
            self.region, self.account, runtime_id
        );
        let registry_ref = format!(
            "{}.registry.{}.corehost.dev/{}",
            self.account, self.region, repository
        );

        let script = state.status_script.iter().cloned().collect();
        state.runtimes.insert(
            runtime_id.clone(),
            StoredRuntime {
                runtime_ref: runtime_ref.clone(),
                script,
            },
        );
        state.launches.push(request);

        Ok(LaunchResult {
            runtime_id,
            runtime_ref,
            registry_ref,
        })
    }

    async fn get_status(&self, runtime_id: &str) -> ServiceResult<RuntimeStatus> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        Self::check(&state, FailPoint::GetStatus)?;

        let runtime = state
            .runtimes
            .get_mut(runtime_id)
            .ok_or_else(|| ServiceError::NotFound(format!("runtime {}", runtime_id)))?;

        let status = if runtime.script.len() > 1 {
            runtime.script.pop_front()
        } else {
            runtime.script.front().cloned()
        };
        Ok(status.unwrap_or(RuntimeStatus::Ready))
    }

    async fn delete_runtime(&self, runtime_id: &str) -> ServiceResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::DeleteRuntime)?;

        state
            .runtimes
            .remove(runtime_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("runtime {}", runtime_id)))
    }

    async fn delete_repository(&self, name: &str, _force: bool) -> ServiceResult<()> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::DeleteRepository)?;

        if state.repositories.remove(name) {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("repository {}", name)))
        }
    }
}

#[async_trait]
impl AgentRuntime for InMemoryControlPlane {
    async fn invoke(
        &self,
        runtime_ref: &str,
        _qualifier: &str,
        payload: &serde_json::Value,
    ) -> ServiceResult<RawResponse> {
        let mut state = self.state.lock();
        Self::check(&state, FailPoint::Invoke)?;

        if !state.runtimes.values().any(|r| r.runtime_ref == runtime_ref) {
            return Err(ServiceError::NotFound(format!("runtime {}", runtime_ref)));
        }
        state
            .invocations
            .push((runtime_ref.to_string(), payload.clone()));

        if let Some(response) = &state.response {
            return Ok(response.clone());
        }

        let prompt = payload
            .get("prompt")
            .and_then(|p| p.as_str())
            .unwrap_or_default();
        let body = serde_json::to_vec(&format!("echo: {}", prompt))
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(RawResponse {
            content_type: Some("application/json".to_string()),
            events: vec![body],
        })
    }
}
