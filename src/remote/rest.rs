//! REST row queries (PostgREST dialect)

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;

use super::RowService;
use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};

const RETURN_REPRESENTATION: &str = "return=representation";

/// Row client for `{url}/rest/v1`
pub struct RestClient {
    base_url: String,
    client: Client,
}

impl RestClient {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .default_headers(auth_headers(&config.anon_key)?)
            .build()?;

        Ok(Self {
            base_url: format!("{}/rest/v1", config.base_url()),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }
}

/// `apikey` plus bearer authorization, shared by the REST and storage clients
pub(crate) fn auth_headers(key: &str) -> Result<HeaderMap> {
    let invalid = |e: header::InvalidHeaderValue| SyncError::Config(format!("invalid access key: {e}"));

    let mut headers = HeaderMap::new();
    headers.insert("apikey", HeaderValue::from_str(key).map_err(invalid)?);
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {key}")).map_err(invalid)?,
    );
    Ok(headers)
}

/// Turn a non-success response into `SyncError::Service`
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(SyncError::Service {
        status: status.as_u16(),
        message,
    })
}

fn first_row(rows: Vec<Value>, table: &str, id: &str) -> Result<Value> {
    rows.into_iter().next().ok_or_else(|| SyncError::NotFound {
        table: table.to_string(),
        id: id.to_string(),
    })
}

#[async_trait]
impl RowService for RestClient {
    async fn select_all(&self, table: &str) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;

        let rows: Vec<Value> = ensure_success(response).await?.json().await?;
        debug!(table, count = rows.len(), "fetched rows");
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.table_url(table))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&row)
            .send()
            .await?;

        let rows: Vec<Value> = ensure_success(response).await?.json().await?;
        first_row(rows, table, "<new>")
    }

    async fn update(&self, table: &str, id: &str, row: Value) -> Result<Value> {
        let filter = format!("eq.{id}");
        let response = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", filter.as_str())])
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&row)
            .send()
            .await?;

        let rows: Vec<Value> = ensure_success(response).await?.json().await?;
        first_row(rows, table, id)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let filter = format!("eq.{id}");
        let response = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", filter.as_str())])
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }
}
