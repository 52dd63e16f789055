//! HTTP client for the cache control plane.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use cacheop_core::remote::{
    AllowedCapacityChanges, ModifyRequest, NodeSnapshot, RemoteApi, ReplicaCountRequest,
    ReshardRequest,
};
use cacheop_core::types::{DesiredSpec, ObservedState, ServiceEvent, Tag};
use cacheop_core::RemoteError;

pub struct HttpRemote {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRemote {
    pub fn new(endpoint: &str) -> Self {
        Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map the response status onto the remote error vocabulary: 404 is
    /// not-found, 409 means the resource is mid-transition, 400 is a
    /// request the control plane rejected outright.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(body)),
            StatusCode::CONFLICT => Err(RemoteError::Busy(body)),
            StatusCode::BAD_REQUEST => Err(RemoteError::InvalidRequest(body)),
            _ => Err(RemoteError::Transport(
                format!("unexpected status {status}: {body}").into(),
            )),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, RemoteError> {
        debug!("GET {}", path);
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(Box::new(e)))?;
        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Transport(Box::new(e)))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        debug!("POST {}", path);
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(Box::new(e)))?;
        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Transport(Box::new(e)))
    }

    async fn post_no_body<B: Serialize>(&self, path: &str, body: &B) -> Result<(), RemoteError> {
        debug!("POST {}", path);
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(Box::new(e)))?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn describe(&self, cache_id: &str) -> Result<ObservedState, RemoteError> {
        self.get_json(&format!("/caches/{cache_id}")).await
    }

    async fn create(&self, spec: &DesiredSpec) -> Result<ObservedState, RemoteError> {
        self.post_json("/caches", spec).await
    }

    async fn delete(&self, cache_id: &str) -> Result<(), RemoteError> {
        debug!("DELETE /caches/{}", cache_id);
        let resp = self
            .http
            .delete(self.url(&format!("/caches/{cache_id}")))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(Box::new(e)))?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn modify(&self, req: &ModifyRequest) -> Result<ObservedState, RemoteError> {
        self.post_json(&format!("/caches/{}/modify", req.cache_id), req)
            .await
    }

    async fn increase_replica_count(
        &self,
        req: &ReplicaCountRequest,
    ) -> Result<ObservedState, RemoteError> {
        self.post_json(&format!("/caches/{}/increase-replicas", req.cache_id), req)
            .await
    }

    async fn decrease_replica_count(
        &self,
        req: &ReplicaCountRequest,
    ) -> Result<ObservedState, RemoteError> {
        self.post_json(&format!("/caches/{}/decrease-replicas", req.cache_id), req)
            .await
    }

    async fn reshard(&self, req: &ReshardRequest) -> Result<ObservedState, RemoteError> {
        self.post_json(&format!("/caches/{}/reshard", req.cache_id), req)
            .await
    }

    async fn list_allowed_capacity_changes(
        &self,
        cache_id: &str,
    ) -> Result<AllowedCapacityChanges, RemoteError> {
        self.get_json(&format!("/caches/{cache_id}/allowed-capacity-changes"))
            .await
    }

    async fn describe_node(&self, node_id: &str) -> Result<NodeSnapshot, RemoteError> {
        self.get_json(&format!("/nodes/{node_id}")).await
    }

    async fn list_events(
        &self,
        cache_id: &str,
        max: usize,
    ) -> Result<Vec<ServiceEvent>, RemoteError> {
        self.get_json(&format!("/caches/{cache_id}/events?max={max}"))
            .await
    }

    async fn list_tags(&self, cache_id: &str) -> Result<Vec<Tag>, RemoteError> {
        self.get_json(&format!("/caches/{cache_id}/tags")).await
    }

    async fn add_tags(&self, cache_id: &str, tags: &[Tag]) -> Result<(), RemoteError> {
        self.post_no_body(&format!("/caches/{cache_id}/tags"), &tags)
            .await
    }

    async fn remove_tags(&self, cache_id: &str, keys: &[String]) -> Result<(), RemoteError> {
        self.post_no_body(&format!("/caches/{cache_id}/tags/remove"), &keys)
            .await
    }
}
