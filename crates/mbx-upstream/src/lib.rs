//! mbx-upstream
//!
//! Adapter for the upstream email-sending platforms. Each instance is a
//! multi-tenant API whose "current workspace" is server-side session state,
//! so callers never hold a client directly: they go through a
//! [`CredentialSession`], which serializes switch + fetch per credential.
//!
//! This crate does **not** write to the cache; the orchestrator hands fetched
//! batches to the reconciliation engine.

pub mod error;
pub mod filter;
pub mod http;
pub mod retry;
pub mod session;

pub use error::{classify_status, CallKind, UpstreamError};
pub use filter::WorkspaceFilter;
pub use http::{HttpClientConfig, HttpUpstreamClient};
pub use retry::{with_retry, RetryPolicy};
pub use session::{CredentialSession, SessionSettings, WorkspaceScope};

use mbx_schemas::{UpstreamAccount, Workspace};

/// Where the next page lives, as reported by `links.next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Absolute URL under the instance's base URL.
    Url(String),
    /// Opaque token, sent back as `cursor=<token>`.
    Token(String),
}

impl PageCursor {
    /// Interpret a raw `links.next` value. Absolute URLs must stay under
    /// `base_url`; anything pointing elsewhere is a decode error.
    pub fn parse(raw: &str, base_url: &str) -> Result<Self, UpstreamError> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let base = base_url.trim_end_matches('/');
            let under_base = raw
                .strip_prefix(base)
                .map(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
                .unwrap_or(false);
            if !under_base {
                return Err(UpstreamError::Decode(format!(
                    "links.next points outside base url: {raw}"
                )));
            }
            Ok(PageCursor::Url(raw.to_string()))
        } else {
            Ok(PageCursor::Token(raw.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountsPage {
    pub accounts: Vec<UpstreamAccount>,
    pub next: Option<PageCursor>,
}

/// One upstream instance. Implementations are stateful upstream-side: a
/// fetch returns accounts of whichever workspace was switched to last.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    fn instance_id(&self) -> &str;

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, UpstreamError>;

    async fn switch_workspace(&self, workspace_id: i64) -> Result<(), UpstreamError>;

    /// `None` requests the first page.
    async fn fetch_accounts_page(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<AccountsPage, UpstreamError>;
}
