//! Pipeline API over JSON-RPC 2.0
//!
//! Implements `PipelineApi` on top of the `HttpClient` bridge. Every call
//! is a POST of one envelope to `{endpoint}/rpc`; representation content is
//! PUT to the upload URL the server hands out before the representation is
//! registered.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use bridge_traits::pipeline::{
    EntityFilter, EntityRecord, NewRepresentation, NewVersion, PipelineApi, RepresentationRecord,
    VersionRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RpcError};
use crate::types::{
    methods, BeginUploadParams, CreateRepresentationParams, CreateVersionParams,
    LatestVersionParams, ListEntitiesParams, RpcCall, RpcResponse, UploadTicket,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC pipeline client
///
/// # Example
///
/// ```ignore
/// use provider_rpc::RpcPipelineClient;
///
/// let client = RpcPipelineClient::new(http_client, "https://pipeline.studio.local/api")
///     .with_api_key(api_key);
/// let records = client.list_entities("P", &EntityFilter::all()).await?;
/// ```
pub struct RpcPipelineClient {
    http_client: Arc<dyn HttpClient>,
    endpoint: String,
    api_key: Option<String>,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcPipelineClient {
    pub fn new(http_client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            retry_policy: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn rpc_url(&self) -> String {
        format!("{}/rpc", self.endpoint)
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match &self.api_key {
            Some(key) => request.bearer_token(key.clone()),
            None => request,
        }
    }

    /// Send one call and decode its result.
    #[instrument(skip(self, params), fields(id))]
    async fn call<P, T>(&self, method: &str, params: P) -> Result<T>
    where
        P: Serialize + Send + Sync,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("id", id);

        let request = HttpRequest::new(HttpMethod::Post, self.rpc_url())
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .json(&RpcCall::new(method, params, id))?;
        let request = self.authorize(request);

        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;

        if !response.is_success() {
            warn!(status = response.status, "Pipeline RPC call failed");
            return Err(RpcError::Http {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let envelope: RpcResponse = response.json()?;
        if let Some(error) = envelope.error {
            debug!(code = error.code, message = %error.message, "Pipeline RPC returned an error");
            return Err(error.into());
        }
        if envelope.jsonrpc != crate::types::JSONRPC_VERSION {
            return Err(RpcError::Protocol(format!(
                "unexpected jsonrpc version '{}'",
                envelope.jsonrpc
            )));
        }
        if envelope.id != Some(id) {
            return Err(RpcError::Protocol(format!(
                "response id {:?} does not match request id {}",
                envelope.id, id
            )));
        }

        serde_json::from_value(envelope.result)
            .map_err(|e| RpcError::Protocol(format!("unexpected {} result: {}", method, e)))
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn upload(&self, url: &str, content: bytes::Bytes) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Put, url)
            .header("Content-Type", "application/octet-stream")
            .timeout(self.request_timeout)
            .body(content);
        let request = self.authorize(request);

        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;
        if !response.is_success() {
            return Err(RpcError::Http {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineApi for RpcPipelineClient {
    #[instrument(skip(self, filter))]
    async fn list_entities(
        &self,
        project: &str,
        filter: &EntityFilter,
    ) -> BridgeResult<Vec<EntityRecord>> {
        let records: Vec<EntityRecord> = self
            .call(methods::LIST_ENTITIES, ListEntitiesParams { project, filter })
            .await?;
        debug!(count = records.len(), "Listed pipeline entities");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn get_latest_version(
        &self,
        project: &str,
        product_id: &str,
    ) -> BridgeResult<Option<VersionRecord>> {
        Ok(self
            .call(
                methods::LATEST_VERSION,
                LatestVersionParams {
                    project,
                    product_id,
                },
            )
            .await?)
    }

    #[instrument(skip(self, request), fields(product_id = %request.product_id, version = request.version))]
    async fn create_version(&self, project: &str, request: NewVersion) -> BridgeResult<VersionRecord> {
        let record: VersionRecord = self
            .call(
                methods::CREATE_VERSION,
                CreateVersionParams {
                    project,
                    version: &request,
                },
            )
            .await?;
        info!(version_id = ?record.id, "Created version");
        Ok(record)
    }

    #[instrument(skip(self, request), fields(version_id = %request.version_id, format = %request.format))]
    async fn create_representation(
        &self,
        project: &str,
        request: NewRepresentation,
    ) -> BridgeResult<RepresentationRecord> {
        let ticket = if request.content.is_empty() {
            None
        } else {
            let ticket: UploadTicket = self
                .call(
                    methods::BEGIN_UPLOAD,
                    BeginUploadParams {
                        project,
                        version_id: &request.version_id,
                        format: &request.format,
                        size: request.content.len(),
                        fingerprint: &request.fingerprint,
                    },
                )
                .await?;
            self.upload(&ticket.upload_url, request.content.clone())
                .await?;
            Some(ticket)
        };

        let record: RepresentationRecord = self
            .call(
                methods::CREATE_REPRESENTATION,
                CreateRepresentationParams {
                    project,
                    version_id: &request.version_id,
                    format: &request.format,
                    fingerprint: &request.fingerprint,
                    dependencies: &request.dependencies,
                    path: ticket.as_ref().map(|t| t.path.as_str()),
                },
            )
            .await?;

        if record.fingerprint.as_deref() != Some(request.fingerprint.as_str()) {
            return Err(BridgeError::OperationFailed(format!(
                "Server recorded fingerprint {:?}, expected {}",
                record.fingerprint, request.fingerprint
            )));
        }

        info!(representation_id = ?record.id, "Created representation");
        Ok(record)
    }
}
