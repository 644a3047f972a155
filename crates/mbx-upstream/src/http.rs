//! reqwest-backed [`UpstreamClient`].
//!
//! Surface per instance:
//! - `GET  {base}/workspaces`                    -> `{data: [{id, name}]}`
//! - `POST {base}/workspaces/switch {team_id}`   -> 2xx
//! - `GET  {base}/sender-emails?per_page=N`      -> `{data: [...], links: {next}}`

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use mbx_schemas::{UpstreamAccount, Workspace};

use crate::{classify_status, AccountsPage, CallKind, PageCursor, UpstreamClient, UpstreamError};

#[derive(Clone)]
pub struct HttpClientConfig {
    pub instance_id: String,
    pub base_url: String,
    pub api_key: String,
    pub page_size: u32,
    pub timeout: Duration,
}

impl std::fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("instance_id", &self.instance_id)
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// API key is passed in by the caller; it is only ever written to the
/// Authorization header.
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    cfg: HttpClientConfig,
    http: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new(cfg: HttpClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self { cfg, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        call: CallKind,
    ) -> Result<Vec<u8>, UpstreamError> {
        let resp = req
            .bearer_auth(&self.cfg.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_status(
                status.as_u16(),
                call,
                &String::from_utf8_lossy(&body),
            ));
        }
        Ok(body.to_vec())
    }
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Network(format!("timeout: {e}"))
    } else {
        UpstreamError::Network(e.to_string())
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8], what: &str) -> Result<T, UpstreamError> {
    serde_json::from_slice(body).map_err(|e| UpstreamError::Decode(format!("{what}: {e}")))
}

#[async_trait::async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn instance_id(&self) -> &str {
        &self.cfg.instance_id
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, UpstreamError> {
        let body = self
            .send(self.http.get(self.url("/workspaces")), CallKind::ListWorkspaces)
            .await?;
        let parsed: WorkspacesResponse = decode(&body, "workspaces response")?;
        Ok(parsed
            .data
            .into_iter()
            .map(|w| Workspace {
                instance_id: self.cfg.instance_id.clone(),
                external_workspace_id: w.id,
                name: w.name,
            })
            .collect())
    }

    async fn switch_workspace(&self, workspace_id: i64) -> Result<(), UpstreamError> {
        let req = self
            .http
            .post(self.url("/workspaces/switch"))
            .json(&serde_json::json!({ "team_id": workspace_id }));
        self.send(req, CallKind::Switch { workspace_id }).await?;
        debug!(instance = %self.cfg.instance_id, workspace_id, "switched workspace");
        Ok(())
    }

    async fn fetch_accounts_page(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<AccountsPage, UpstreamError> {
        let per_page = self.cfg.page_size.to_string();
        let req = match cursor {
            None => self
                .http
                .get(self.url("/sender-emails"))
                .query(&[("per_page", per_page.as_str())]),
            Some(PageCursor::Url(u)) => self.http.get(u.as_str()),
            Some(PageCursor::Token(t)) => self
                .http
                .get(self.url("/sender-emails"))
                .query(&[("per_page", per_page.as_str()), ("cursor", t.as_str())]),
        };

        let body = self.send(req, CallKind::FetchPage).await?;
        let parsed: AccountsResponse = decode(&body, "sender-emails response")?;
        let next = match parsed.links.and_then(|l| l.next) {
            Some(raw) if !raw.trim().is_empty() => {
                Some(PageCursor::parse(&raw, &self.cfg.base_url)?)
            }
            _ => None,
        };
        Ok(AccountsPage {
            accounts: parsed.data,
            next,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WorkspacesResponse {
    #[serde(default)]
    data: Vec<WorkspaceRow>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceRow {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    data: Vec<UpstreamAccount>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let cfg = HttpClientConfig {
            instance_id: "maverick".into(),
            base_url: "https://send.example.com/api".into(),
            api_key: "12|very-secret".into(),
            page_size: 100,
            timeout: Duration::from_secs(30),
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("very-secret"), "{dbg}");
        assert!(dbg.contains("<REDACTED>"));
    }

    #[test]
    fn response_without_links_has_no_next() {
        let r: AccountsResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(r.links.is_none());
        let r: AccountsResponse =
            serde_json::from_str(r#"{"data": [], "links": {"next": null}}"#).unwrap();
        assert!(r.links.unwrap().next.is_none());
    }
}
