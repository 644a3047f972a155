//! Single-flight access to one credential.
//!
//! The upstream keeps "current workspace" as session state keyed by the API
//! key, so two switch/fetch sequences on one key would read each other's
//! accounts. A [`CredentialSession`] owns the client behind a mutex and only
//! hands out fetch access through a [`WorkspaceScope`], which holds the lock
//! for as long as it lives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use mbx_schemas::{UpstreamAccount, Workspace};

use crate::{
    with_retry, AccountsPage, PageCursor, RetryPolicy, UpstreamClient, UpstreamError,
    WorkspaceFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub retry: RetryPolicy,
    pub max_pages_per_workspace: u32,
    /// Sleep between consecutive page requests.
    pub page_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_pages_per_workspace: 500,
            page_delay: Duration::from_millis(100),
        }
    }
}

pub struct CredentialSession {
    instance_id: String,
    client: Arc<dyn UpstreamClient>,
    /// External id of the workspace last switched to, if any.
    active: Mutex<Option<i64>>,
    settings: SessionSettings,
    filter: WorkspaceFilter,
}

impl std::fmt::Debug for CredentialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSession")
            .field("instance_id", &self.instance_id)
            .field("settings", &self.settings)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl CredentialSession {
    pub fn new(client: Arc<dyn UpstreamClient>, settings: SessionSettings) -> Self {
        Self {
            instance_id: client.instance_id().to_string(),
            client,
            active: Mutex::new(None),
            settings,
            filter: WorkspaceFilter::default(),
        }
    }

    /// Restrict which listed workspaces this session reports.
    pub fn with_filter(mut self, filter: WorkspaceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// List workspaces under the session lock, retrying transient failures,
    /// then drop the ones the filter does not admit.
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>, UpstreamError> {
        let _guard = self.active.lock().await;
        let client = &self.client;
        let listed = with_retry(&self.settings.retry, "list_workspaces", move || {
            client.list_workspaces()
        })
        .await?;
        let total = listed.len();
        let ws = self.filter.apply(listed);
        info!(
            instance = %self.instance_id,
            count = ws.len(),
            skipped = total - ws.len(),
            "listed workspaces"
        );
        Ok(ws)
    }

    /// Take the credential, switch to `workspace` and return a scope that
    /// can fetch its accounts. Waits while another scope is alive.
    pub async fn enter<'a>(
        &'a self,
        workspace: &'a Workspace,
    ) -> Result<WorkspaceScope<'a>, UpstreamError> {
        let mut guard = self.active.lock().await;
        let client = &self.client;
        let id = workspace.external_workspace_id;
        // A failed switch leaves the upstream context unknown.
        *guard = None;
        with_retry(&self.settings.retry, "switch_workspace", move || {
            client.switch_workspace(id)
        })
        .await?;
        *guard = Some(id);
        debug!(instance = %self.instance_id, workspace = %workspace.name, "entered workspace");
        Ok(WorkspaceScope {
            session: self,
            workspace,
            _guard: guard,
        })
    }
}

/// Proof that this task holds the credential and has switched to
/// `workspace`. Dropping it releases the credential.
pub struct WorkspaceScope<'a> {
    session: &'a CredentialSession,
    workspace: &'a Workspace,
    _guard: MutexGuard<'a, Option<i64>>,
}

impl WorkspaceScope<'_> {
    pub fn workspace(&self) -> &Workspace {
        self.workspace
    }

    /// One page, retried on transient failure.
    pub async fn fetch_page(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<AccountsPage, UpstreamError> {
        let client = &self.session.client;
        with_retry(&self.session.settings.retry, "fetch_accounts_page", move || {
            client.fetch_accounts_page(cursor)
        })
        .await
    }

    /// Walk every page of the current workspace.
    ///
    /// Stops when `next` is absent or a page comes back empty. Going past
    /// `max_pages_per_workspace` discards everything fetched so far.
    pub async fn fetch_all(&self) -> Result<Vec<UpstreamAccount>, UpstreamError> {
        let settings = &self.session.settings;
        let mut out: Vec<UpstreamAccount> = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        let mut pages: u32 = 0;

        loop {
            if pages >= settings.max_pages_per_workspace {
                return Err(UpstreamError::PageLimitExceeded {
                    max_pages: settings.max_pages_per_workspace,
                });
            }
            if pages > 0 && !settings.page_delay.is_zero() {
                tokio::time::sleep(settings.page_delay).await;
            }

            let page = self.fetch_page(cursor.as_ref()).await?;
            pages += 1;
            debug!(
                instance = %self.session.instance_id,
                workspace = %self.workspace.name,
                page = pages,
                count = page.accounts.len(),
                "fetched page"
            );

            if page.accounts.is_empty() {
                break;
            }
            out.extend(page.accounts);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(out)
    }
}
