use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;

use mbx_schemas::{UpstreamAccount, Workspace};
use mbx_upstream::{AccountsPage, PageCursor, UpstreamClient, UpstreamError};

/// One recorded upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListWorkspaces,
    Switch(i64),
    /// Workspace current at fetch time and the page offset requested.
    Fetch { workspace_id: Option<i64>, offset: usize },
}

#[derive(Default)]
struct Script {
    list_error: Option<UpstreamError>,
    switch_errors: BTreeMap<i64, UpstreamError>,
    fetch_errors: BTreeMap<i64, UpstreamError>,
    /// Errors returned once each, before the scripted behavior resumes.
    transient_fetch_errors: BTreeMap<i64, usize>,
}

/// An upstream instance driven from a script.
///
/// Like the real service it remembers the last switched-to workspace and
/// answers fetches for that workspace only. Pagination uses offset tokens.
pub struct ScriptedUpstream {
    instance_id: String,
    workspaces: Vec<Workspace>,
    accounts: BTreeMap<i64, Vec<UpstreamAccount>>,
    page_size: usize,
    call_delay: Duration,
    current: Mutex<Option<i64>>,
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Semaphore>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedUpstream {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            workspaces: Vec::new(),
            accounts: BTreeMap::new(),
            page_size: 50,
            call_delay: Duration::ZERO,
            current: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn with_workspace(mut self, id: i64, name: &str, accounts: Vec<UpstreamAccount>) -> Self {
        self.workspaces.push(Workspace {
            instance_id: self.instance_id.clone(),
            external_workspace_id: id,
            name: name.to_string(),
        });
        self.accounts.insert(id, accounts);
        self
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    /// Sleep inside every call so overlapping callers would be observed.
    pub fn with_call_delay(mut self, d: Duration) -> Self {
        self.call_delay = d;
        self
    }

    /// Block every page fetch until [`ScriptedUpstream::open_gate`].
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        if let Some(g) = &self.gate {
            g.add_permits(1);
        }
    }

    pub fn fail_list(&self, err: UpstreamError) {
        lock(&self.script).list_error = Some(err);
    }

    pub fn fail_switch(&self, workspace_id: i64, err: UpstreamError) {
        lock(&self.script).switch_errors.insert(workspace_id, err);
    }

    pub fn fail_fetch(&self, workspace_id: i64, err: UpstreamError) {
        lock(&self.script).fetch_errors.insert(workspace_id, err);
    }

    /// The next `times` fetches in `workspace_id` fail with a network error.
    pub fn flaky_fetch(&self, workspace_id: i64, times: usize) {
        lock(&self.script)
            .transient_fetch_errors
            .insert(workspace_id, times);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Highest number of calls observed executing at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter_call(&self, call: Call) -> InFlight<'_> {
        lock(&self.calls).push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        guard
    }
}

#[async_trait::async_trait]
impl UpstreamClient for ScriptedUpstream {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, UpstreamError> {
        let _call = self.enter_call(Call::ListWorkspaces).await;
        if let Some(e) = lock(&self.script).list_error.clone() {
            return Err(e);
        }
        Ok(self.workspaces.clone())
    }

    async fn switch_workspace(&self, workspace_id: i64) -> Result<(), UpstreamError> {
        let _call = self.enter_call(Call::Switch(workspace_id)).await;
        if let Some(e) = lock(&self.script).switch_errors.get(&workspace_id).cloned() {
            return Err(e);
        }
        if !self.accounts.contains_key(&workspace_id) {
            return Err(UpstreamError::WorkspaceSwitch {
                workspace_id,
                status: 404,
                message: "no such team".to_string(),
            });
        }
        *lock(&self.current) = Some(workspace_id);
        Ok(())
    }

    async fn fetch_accounts_page(
        &self,
        cursor: Option<&PageCursor>,
    ) -> Result<AccountsPage, UpstreamError> {
        if let Some(g) = &self.gate {
            let _permit = g
                .acquire()
                .await
                .map_err(|e| UpstreamError::Network(e.to_string()))?;
        }

        let offset = match cursor {
            None => 0,
            Some(PageCursor::Token(t)) => t
                .parse::<usize>()
                .map_err(|e| UpstreamError::Decode(format!("bad cursor {t}: {e}")))?,
            Some(PageCursor::Url(u)) => {
                return Err(UpstreamError::Decode(format!("unexpected url cursor {u}")))
            }
        };
        let current = *lock(&self.current);
        let _call = self
            .enter_call(Call::Fetch {
                workspace_id: current,
                offset,
            })
            .await;

        let Some(ws) = current else {
            return Err(UpstreamError::Api {
                status: 400,
                message: "no workspace selected".to_string(),
            });
        };
        {
            let mut script = lock(&self.script);
            if let Some(e) = script.fetch_errors.get(&ws).cloned() {
                return Err(e);
            }
            if let Some(left) = script.transient_fetch_errors.get_mut(&ws) {
                if *left > 0 {
                    *left -= 1;
                    return Err(UpstreamError::Network("connection reset".to_string()));
                }
            }
        }

        let all = self.accounts.get(&ws).map(Vec::as_slice).unwrap_or(&[]);
        let end = (offset + self.page_size).min(all.len());
        let accounts = all.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next = (end < all.len()).then(|| PageCursor::Token(end.to_string()));
        Ok(AccountsPage { accounts, next })
    }
}
