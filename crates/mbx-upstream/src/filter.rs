//! Which listed workspaces an instance actually syncs.

use mbx_schemas::Workspace;

/// Name-based selection applied after `list_workspaces`. Names compare
/// trimmed and case-insensitively. An empty `include` admits every
/// workspace; `exclude` always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

fn norm(name: &str) -> String {
    name.trim().to_lowercase()
}

impl WorkspaceFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: include.into_iter().map(|n| norm(n.as_ref())).collect(),
            exclude: exclude.into_iter().map(|n| norm(n.as_ref())).collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn allows(&self, workspace: &Workspace) -> bool {
        let name = norm(&workspace.name);
        if self.exclude.contains(&name) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&name)
    }

    /// Keep allowed workspaces in upstream order.
    pub fn apply(&self, workspaces: Vec<Workspace>) -> Vec<Workspace> {
        if self.is_open() {
            return workspaces;
        }
        workspaces.into_iter().filter(|w| self.allows(w)).collect()
    }
}
