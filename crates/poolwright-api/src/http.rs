use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use poolwright_core::catalog::{InstanceType, SecurityGroup, Template};
use poolwright_core::pool::{PoolSpec, PoolState, PoolUpdate};
use poolwright_core::retry::{Backoff, Poll, PollError, RetryPolicy, poll_until, retry_if};

use crate::error::{ApiError, format_err_chain};
use crate::gateway::{BoxFuture, Gateway};
use crate::signer::{Signer, expiry_from_now};
use crate::wire::{
    CreatePoolRequest, ErrorBody, InstancePoolBody, InstanceTypeList, Operation,
    ScalePoolRequest, SecurityGroupList, TemplateBody, TemplateList, UpdatePoolRequest,
    reset_fields,
};

/// Per-zone API endpoint; `{zone}` is substituted on every call.
pub const DEFAULT_ENDPOINT: &str = "https://api-{zone}.exoscale.com/v2";

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout: Duration,
    /// Applied to reads only, and only for transient failures.
    pub read_retry: RetryPolicy,
    /// How long to wait for an accepted operation to finish.
    pub operation_wait: RetryPolicy,
}

impl HttpGatewayConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            request_timeout: Duration::from_secs(60),
            read_retry: RetryPolicy::exponential(
                Duration::from_millis(500),
                Duration::from_secs(4),
                Duration::from_secs(30),
            )
            .with_max_attempts(4),
            operation_wait: RetryPolicy {
                max_attempts: None,
                backoff: Backoff::Fixed { delay_ms: 2_000 },
                timeout_ms: Some(10 * 60 * 1_000),
            },
        }
    }
}

/// Gateway backed by the HTTP compute API.
///
/// A single `reqwest::Client` (and its connection pool) is shared by all
/// callers; the gateway itself holds no per-pool state.
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
    signer: Signer,
    read_retry: RetryPolicy,
    operation_wait: RetryPolicy,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("poolwright/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Config(format_err_chain(&e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            signer: Signer::new(config.api_key, config.api_secret),
            read_retry: config.read_retry,
            operation_wait: config.operation_wait,
        })
    }

    fn url(&self, zone: &str, path: &str) -> Result<Url, ApiError> {
        let base = self.endpoint.replace("{zone}", zone);
        Url::parse(&format!("{}{path}", base.trim_end_matches('/')))
            .map_err(|e| ApiError::Config(format!("invalid endpoint {base}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        zone: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ApiError> {
        let mut url = self.url(zone, path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        let body = body.unwrap_or_default();
        let authorization = self.signer.authorization(
            method.as_str(),
            url.path(),
            query,
            &body,
            expiry_from_now(),
        )?;

        tracing::debug!(method = %method, zone, path, "API request");

        let mut request = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, authorization);
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        tracing::debug!(status = status.as_u16(), %message, "API request failed");
        Err(ApiError::from_status(status.as_u16(), message))
    }

    async fn read<T: DeserializeOwned>(
        &self,
        zone: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let bytes = retry_if(
            &self.read_retry,
            || self.send(Method::GET, zone, path, query, None),
            ApiError::is_transient,
        )
        .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Issue a mutating call once and wait for its operation to finish.
    async fn mutate(
        &self,
        method: Method,
        zone: &str,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Operation, ApiError> {
        let bytes = self.send(method, zone, path, &[], body).await?;
        let operation: Operation = serde_json::from_slice(&bytes)?;
        self.wait_operation(zone, operation).await
    }

    async fn wait_operation(&self, zone: &str, operation: Operation) -> Result<Operation, ApiError> {
        let id = operation.id.clone();
        let path = format!("/operation/{id}");
        let mut seed = Some(operation);

        let finished = poll_until(&self.operation_wait, &CancellationToken::new(), |_| {
            let known = seed.take();
            let path = path.as_str();
            async move {
                let op = match known {
                    Some(op) => op,
                    None => self.read::<Operation>(zone, path, &[]).await?,
                };
                if op.is_pending() {
                    Ok(Poll::Pending(format!("operation {} pending", op.id)))
                } else {
                    Ok(Poll::Ready(op))
                }
            }
        })
        .await
        .map_err(|e| match e {
            PollError::Probe(e) => e,
            _ => ApiError::OperationTimeout { id: id.clone() },
        })?;

        if finished.is_success() {
            return Ok(finished);
        }
        Err(ApiError::OperationFailed {
            id,
            message: finished
                .message
                .clone()
                .or_else(|| finished.reason.clone())
                .unwrap_or_default(),
            state: finished.state,
        })
    }
}

impl Gateway for HttpGateway {
    fn create_instance_pool<'a>(
        &'a self,
        spec: &'a PoolSpec,
    ) -> BoxFuture<'a, Result<String, ApiError>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&CreatePoolRequest::from(spec))?;
            let operation = self
                .mutate(Method::POST, &spec.zone, "/instance-pool", Some(body))
                .await?;

            let id = operation
                .reference
                .map(|r| r.id)
                .ok_or_else(|| ApiError::Decode("create operation carries no reference".into()))?;

            tracing::info!(zone = %spec.zone, pool_id = %id, name = %spec.name, "instance pool created");
            Ok(id)
        })
    }

    fn get_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<PoolState, ApiError>> {
        Box::pin(async move {
            let body: InstancePoolBody = self
                .read(zone, &format!("/instance-pool/{id}"), &[])
                .await?;
            body.into_state(zone)
        })
    }

    fn update_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        update: &'a PoolUpdate,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let path = format!("/instance-pool/{id}");

            let set = UpdatePoolRequest::from(update);
            if !set.is_empty() {
                let body = serde_json::to_vec(&set)?;
                self.mutate(Method::PUT, zone, &path, Some(body)).await?;
            }

            for field in reset_fields(update) {
                self.mutate(Method::DELETE, zone, &format!("{path}/{field}"), None)
                    .await?;
            }

            tracing::info!(zone, pool_id = %id, "instance pool updated");
            Ok(())
        })
    }

    fn scale_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
        size: u64,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&ScalePoolRequest { size })?;
            self.mutate(
                Method::PUT,
                zone,
                &format!("/instance-pool/{id}:scale"),
                Some(body),
            )
            .await?;

            tracing::info!(zone, pool_id = %id, size, "instance pool scale requested");
            Ok(())
        })
    }

    fn delete_instance_pool<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.mutate(Method::DELETE, zone, &format!("/instance-pool/{id}"), None)
                .await?;

            tracing::info!(zone, pool_id = %id, "instance pool delete requested");
            Ok(())
        })
    }

    fn list_templates<'a>(
        &'a self,
        zone: &'a str,
        visibility: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Template>, ApiError>> {
        Box::pin(async move {
            let list: TemplateList = self
                .read(zone, "/template", &[("visibility", visibility)])
                .await?;
            Ok(list.templates.into_iter().map(Template::from).collect())
        })
    }

    fn get_template<'a>(
        &'a self,
        zone: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Template, ApiError>> {
        Box::pin(async move {
            let body: TemplateBody = self.read(zone, &format!("/template/{id}"), &[]).await?;
            Ok(Template::from(body))
        })
    }

    fn list_instance_types<'a>(
        &'a self,
        zone: &'a str,
    ) -> BoxFuture<'a, Result<Vec<InstanceType>, ApiError>> {
        Box::pin(async move {
            let list: InstanceTypeList = self.read(zone, "/instance-type", &[]).await?;
            Ok(list.instance_types.into_iter().map(InstanceType::from).collect())
        })
    }

    fn list_security_groups<'a>(
        &'a self,
        zone: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SecurityGroup>, ApiError>> {
        Box::pin(async move {
            let list: SecurityGroupList = self.read(zone, "/security-group", &[]).await?;
            Ok(list
                .security_groups
                .into_iter()
                .map(SecurityGroup::from)
                .collect())
        })
    }
}
