use super::{GridBackend, GridSaveInfo};
use crate::error::BackendError;
use async_trait::async_trait;
use gridcore::MultiGridInfo;
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;

const API_PREFIX: &str = "/api/topo";

/// JSON mirror of a population, `{levels, global_ids}`.
#[derive(Debug, Serialize)]
pub struct PopulationBody<'a> {
    pub levels: &'a [u8],
    pub global_ids: &'a [u32],
}

impl<'a> From<&'a MultiGridInfo> for PopulationBody<'a> {
    fn from(info: &'a MultiGridInfo) -> Self {
        Self {
            levels: &info.levels,
            global_ids: &info.global_ids,
        }
    }
}

/// Grid store reached over HTTP.
///
/// Requests carry populations as JSON `{levels, global_ids}`; replies come
/// back in the binary layout.
#[derive(Debug, Clone)]
pub struct HttpGridBackend {
    client: Client,
    base_url: String,
}

impl HttpGridBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder().timeout(timeout).build().map_err(|source| BackendError::Http {
            url: base_url.clone(),
            source,
        })?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}/{}", self.base_url, API_PREFIX, path)
    }

    /// GETs `url` and decodes the body as a population.
    pub async fn from_get_url(&self, url: &str) -> Result<MultiGridInfo, BackendError> {
        let resp = self.client.get(url).send().await;
        let bytes = read_body(url, resp).await?;
        Ok(MultiGridInfo::from_buffer(&bytes)?)
    }

    /// POSTs `body` as JSON and decodes the response as a population.
    pub async fn from_post_url<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<MultiGridInfo, BackendError> {
        let bytes = self.post_json(url, body).await?;
        Ok(MultiGridInfo::from_buffer(&bytes)?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<bytes::Bytes, BackendError> {
        let resp = self.client.post(url).json(body).send().await;
        read_body(url, resp).await
    }

    async fn post_population(&self, path: &str, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError> {
        self.from_post_url(&self.endpoint(path), &PopulationBody::from(cells)).await
    }
}

async fn read_body(url: &str, resp: reqwest::Result<Response>) -> Result<bytes::Bytes, BackendError> {
    let http = |source| BackendError::Http {
        url: url.to_string(),
        source,
    };
    let resp = resp.map_err(http)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    resp.bytes().await.map_err(http)
}

#[async_trait]
impl GridBackend for HttpGridBackend {
    async fn activate_info(&self) -> Result<MultiGridInfo, BackendError> {
        self.from_get_url(&self.endpoint("activate-info")).await
    }

    async fn deleted_info(&self) -> Result<MultiGridInfo, BackendError> {
        self.from_get_url(&self.endpoint("deleted-info")).await
    }

    async fn subdivide(&self, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError> {
        self.post_population("subdivide", cells).await
    }

    async fn merge(&self, cells: &MultiGridInfo) -> Result<MultiGridInfo, BackendError> {
        self.post_population("merge", cells).await
    }

    async fn delete(&self, cells: &MultiGridInfo) -> Result<(), BackendError> {
        let body = PopulationBody::from(cells);
        self.post_json(&self.endpoint("delete"), &body).await.map(|_| ())
    }

    async fn recover(&self, cells: &MultiGridInfo) -> Result<(), BackendError> {
        let body = PopulationBody::from(cells);
        self.post_json(&self.endpoint("recover"), &body).await.map(|_| ())
    }

    async fn pick(&self, feature_dir: &str) -> Result<MultiGridInfo, BackendError> {
        let url = self.endpoint("pick");
        let resp = self.client.get(&url).query(&[("feature_dir", feature_dir)]).send().await;
        let bytes = read_body(&url, resp).await?;
        Ok(MultiGridInfo::from_buffer(&bytes)?)
    }

    async fn save(&self) -> Result<GridSaveInfo, BackendError> {
        let url = self.endpoint("save");
        let resp = self.client.get(&url).send().await;
        let bytes = read_body(&url, resp).await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_cleanly() {
        let backend = HttpGridBackend::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(backend.endpoint("activate-info"), "http://localhost:8000/api/topo/activate-info");
    }

    #[test]
    fn population_body_shape() {
        let info = MultiGridInfo::new(vec![1, 2], vec![3, 4]).unwrap();
        let json = serde_json::to_value(PopulationBody::from(&info)).unwrap();
        assert_eq!(json, serde_json::json!({ "levels": [1, 2], "global_ids": [3, 4] }));
    }
}
