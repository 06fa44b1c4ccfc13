//! PostgREST (Supabase `/rest/v1`) client implementing [`RemoteStore`].

use crate::application::ports::{RemoteFilter, RemoteStore};
use crate::domain::value_objects::{RecordId, RecordPayload, TableName};
use crate::shared::config::RemoteConfig;
use crate::shared::error::RemoteStoreError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const MAX_LOG_BODY_CHARS: usize = 512;
const SCHEMA_ERROR_CODES: [&str; 2] = ["PGRST204", "PGRST205"];

#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostgrestRemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl PostgrestRemoteStore {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteStoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|err| RemoteStoreError::Serialization(format!("invalid api key: {err}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| RemoteStoreError::Serialization(format!("invalid api key: {err}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RemoteStoreError::Unreachable(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `remote.url` と `remote.api_key` が揃っていなければ `Ok(None)`。
    pub fn from_config(config: &RemoteConfig) -> Result<Option<Self>, RemoteStoreError> {
        match (config.url.as_deref(), config.api_key.as_deref()) {
            (Some(url), Some(key)) => Ok(Some(Self::new(
                url,
                key,
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    fn table_url(&self, table: &TableName) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url,
            urlencoding::encode(table.as_str())
        )
    }

    fn request(&self, method: Method, table: &TableName, filters: &[RemoteFilter]) -> RequestBuilder {
        let query = encode_filters(filters);
        let url = if query.is_empty() {
            self.table_url(table)
        } else {
            format!("{}?{}", self.table_url(table), query)
        };
        self.client.request(method, url)
    }

    async fn send_rows(&self, builder: RequestBuilder) -> Result<Vec<RecordPayload>, RemoteStoreError> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        log_response(status, &body);

        if !status.is_success() {
            return Err(classify_error_response(status.as_u16(), &body));
        }
        parse_rows(&body)
    }

    fn write_builder(&self, builder: RequestBuilder, data: &RecordPayload) -> RequestBuilder {
        builder
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return=representation")
            .json(data.as_map())
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemoteStore {
    async fn insert(
        &self,
        table: &TableName,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        let builder = self.write_builder(self.request(Method::POST, table, &[]), data);
        let rows = self.send_rows(builder).await?;
        // return=representation が空配列のときは送った値をそのまま返す
        Ok(rows.into_iter().next().unwrap_or_else(|| data.clone()))
    }

    async fn update(
        &self,
        table: &TableName,
        id: &RecordId,
        data: &RecordPayload,
    ) -> Result<RecordPayload, RemoteStoreError> {
        let filters = [RemoteFilter::by_id(id)];
        let builder = self.write_builder(self.request(Method::PATCH, table, &filters), data);
        let rows = self.send_rows(builder).await?;
        rows.into_iter().next().ok_or_else(|| {
            RemoteStoreError::rejected(
                StatusCode::NOT_FOUND.as_u16(),
                format!("{} row {} not found", table, id),
            )
        })
    }

    async fn delete(&self, table: &TableName, id: &RecordId) -> Result<(), RemoteStoreError> {
        let filters = [RemoteFilter::by_id(id)];
        let builder = self.request(Method::DELETE, table, &filters);
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.map_err(map_transport_error)?;
        log_response(status, &body);
        Err(classify_error_response(status.as_u16(), &body))
    }

    async fn fetch_one(
        &self,
        table: &TableName,
        filters: &[RemoteFilter],
    ) -> Result<Option<RecordPayload>, RemoteStoreError> {
        let builder = self
            .request(Method::GET, table, filters)
            .query(&[("select", "*"), ("limit", "1")]);
        let rows = self.send_rows(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn ping(&self) -> Result<(), RemoteStoreError> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        // 4xx でもサーバーには届いている
        if status.is_server_error() {
            return Err(RemoteStoreError::rejected(
                status.as_u16(),
                "remote store returned a server error",
            ));
        }
        Ok(())
    }
}

/// Builds `column=eq.value` query pairs for PostgREST.
pub fn encode_filters(filters: &[RemoteFilter]) -> String {
    filters
        .iter()
        .map(|filter| {
            let operand = match &filter.value {
                Value::Null => "is.null".to_string(),
                Value::String(text) => format!("eq.{text}"),
                other => format!("eq.{other}"),
            };
            format!(
                "{}={}",
                urlencoding::encode(&filter.column),
                urlencoding::encode(&operand)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Maps a non-2xx response to a [`RemoteStoreError`].
///
/// PostgREST reports stale schema caches as `PGRST204`/`PGRST205`; those are
/// classified as [`RemoteStoreError::SchemaMismatch`] so the write is queued.
pub fn classify_error_response(status: u16, body: &str) -> RemoteStoreError {
    let parsed: PostgrestErrorBody = serde_json::from_str(body).unwrap_or_default();

    let message = parsed
        .message
        .clone()
        .or_else(|| parsed.details.clone())
        .or_else(|| parsed.hint.clone())
        .unwrap_or_else(|| truncate(body));

    let is_schema_code = parsed
        .code
        .as_deref()
        .map(|code| SCHEMA_ERROR_CODES.contains(&code))
        .unwrap_or(false);
    let mentions_schema_cache = message.to_ascii_lowercase().contains("schema cache")
        || body.to_ascii_lowercase().contains("schema cache");

    if is_schema_code || mentions_schema_cache {
        return RemoteStoreError::SchemaMismatch(message);
    }
    RemoteStoreError::rejected(status, message)
}

fn parse_rows(body: &str) -> Result<Vec<RecordPayload>, RemoteStoreError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(body)?;
    let rows = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(RemoteStoreError::Serialization(format!(
                "unexpected response shape: {other}"
            )));
        }
    };
    rows.into_iter()
        .map(|row| RecordPayload::from_value(row).map_err(RemoteStoreError::Serialization))
        .collect()
}

fn map_transport_error(err: reqwest::Error) -> RemoteStoreError {
    if err.is_decode() {
        RemoteStoreError::Serialization(err.to_string())
    } else {
        RemoteStoreError::Unreachable(err.to_string())
    }
}

fn truncate(body: &str) -> String {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

fn log_response(status: StatusCode, body: &str) {
    if status.is_success() {
        tracing::debug!(target: "offline::remote", status = %status, "remote response");
        return;
    }
    tracing::debug!(
        target: "offline::remote",
        status = %status,
        body = %truncate(body),
        "remote error response"
    );
}
