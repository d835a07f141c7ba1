//! Update-center web API client ([`TrackingStore`]).
//!
//! Every call authenticates with HTTP basic credentials when configured and
//! carries the access token: in the JSON body for writes, as the
//! `AccessToken` query parameter for the reset call. The token is added
//! after the payload is logged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use formsync_core::{
    FormSyncError, LogicalChangeId, Result, TrackingRecord, TrackingStore,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::http::{build_client, ensure_success, read_json, RetryPolicy};

const API_PREFIX: &str = "updatecenterwebapi/api";

/// File name the downloaded form source is saved under.
pub const SOURCE_ARCHIVE: &str = "source.zip";

pub struct UpdateCenterClient {
    http: Client,
    base_url: String,
    token: String,
    credentials: Option<(String, Option<String>)>,
    retry: RetryPolicy,
}

impl UpdateCenterClient {
    /// `base_url` is the site root; the API lives under `/updatecenterwebapi/api`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            credentials: None,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some((user.into(), password));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/{API_PREFIX}/{endpoint}", self.base_url));
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    /// Download the zipped source attached to form `form_id` of build
    /// `build_id` into `dest_dir/source.zip`.
    ///
    /// Returns `None` when the update center has no source for the form.
    pub async fn download_source(
        &self,
        build_id: &str,
        form_id: &str,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let operation = "download form source";
        info!(build_id, form_id, "Downloading form source");
        let response = self
            .retry
            .send(operation, || {
                self.request(Method::GET, "DownloadFormSourceFiles")
                    .query(&[("BuildID", build_id), ("FormID", form_id)])
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            info!(build_id, form_id, "No source for this form; nothing to download");
            return Ok(None);
        }
        let mut response = ensure_success(operation, response).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let archive = dest_dir.join(SOURCE_ARCHIVE);
        let mut file = tokio::fs::File::create(&archive).await?;
        let mut written = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        info!(path = %archive.display(), bytes = written, "Form source saved");
        Ok(Some(archive))
    }

    fn with_token(&self, mut body: Value) -> Value {
        if let Value::Object(map) = &mut body {
            map.insert("AccessToken".to_string(), Value::String(self.token.clone()));
        }
        body
    }

    async fn write(
        &self,
        operation: &str,
        method: Method,
        endpoint: &str,
        body: Value,
    ) -> Result<Value> {
        debug!(operation, payload = %body, "Sending form data");
        let body = self.with_token(body);
        let response = self
            .request(method, endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        let response = ensure_success(operation, response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        let reply = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        if let Some(error) = reply.get("error").or_else(|| reply.get("Error")) {
            if !error.is_null() {
                return Err(FormSyncError::external(operation, error));
            }
        }
        Ok(reply)
    }
}

/// `FormID` arrives as a number or a string.
fn form_id_of(reply: &Value) -> Option<String> {
    match reply.get("FormID")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl TrackingStore for UpdateCenterClient {
    async fn find(&self, change: &LogicalChangeId) -> Result<Option<TrackingRecord>> {
        let operation = "get form";
        let response = self
            .retry
            .send(operation, || {
                self.request(Method::GET, "gitlabform").query(&[
                    ("GitMergeID", change.merge_request_iid.as_str()),
                    ("GitProjectID", change.project_id.as_str()),
                ])
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            info!(change = %change, "No form exists for this change");
            return Ok(None);
        }
        let record: TrackingRecord = read_json(operation, response).await?;
        info!(change = %change, form_id = %record.id(), "Found form");
        Ok(Some(record))
    }

    async fn create(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        let operation = "create form";
        let reply = self
            .write(operation, Method::POST, "createform", serde_json::to_value(payload)?)
            .await?;
        let form_id = form_id_of(&reply)
            .ok_or_else(|| FormSyncError::external(operation, "reply has no FormID"))?;
        let mut created = payload.clone();
        created.form_id = Some(form_id);
        Ok(created)
    }

    async fn update(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        self.write(
            "modify form",
            Method::POST,
            "modifyandbuildform",
            serde_json::to_value(payload)?,
        )
        .await?;
        Ok(payload.clone())
    }

    async fn update_properties(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        let body = json!({
            "BuildID": payload.build_id,
            "FormID": payload.id(),
            "GitLabFormProperties": payload.properties,
        });
        self.write("modify form properties", Method::PUT, "modifygitlabinfo", body)
            .await?;
        Ok(payload.clone())
    }

    async fn reset_to_created(&self, record: &TrackingRecord, reason: &str) -> Result<()> {
        let operation = "reset form to created";
        debug!(operation, form_id = %record.id(), reason, "Resetting form");
        let response = self
            .request(Method::PUT, "ResetUpdateAndMoveFormToCreatedState")
            .query(&[
                ("BuildID", record.build_id.as_str()),
                ("FormID", record.id()),
                ("Comment", reason),
                ("AccessToken", self.token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }
}
