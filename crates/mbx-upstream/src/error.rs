//! Upstream failure taxonomy.
//!
//! The classifier methods decide the blast radius: retryable errors are
//! retried in place, fatal errors abort the whole instance, everything else
//! is scoped to the workspace being processed.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// 401/403. The credential is bad for every workspace on the instance.
    Auth { status: u16, message: String },
    /// Transport failure, timeout, 408, 429 or 5xx.
    Network(String),
    /// The switch call was refused for a reason other than auth or transport.
    WorkspaceSwitch {
        workspace_id: i64,
        status: u16,
        message: String,
    },
    /// Any other non-success status on a read.
    Api { status: u16, message: String },
    /// Body or `links.next` could not be understood.
    Decode(String),
    /// Pagination did not finish within `max_pages`.
    PageLimitExceeded { max_pages: u32 },
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Network(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, UpstreamError::Auth { .. })
    }

    /// Stable short code for logs and job error messages.
    pub fn code(&self) -> &'static str {
        match self {
            UpstreamError::Auth { .. } => "AUTH",
            UpstreamError::Network(_) => "NETWORK",
            UpstreamError::WorkspaceSwitch { .. } => "WORKSPACE_SWITCH",
            UpstreamError::Api { .. } => "API",
            UpstreamError::Decode(_) => "DECODE",
            UpstreamError::PageLimitExceeded { .. } => "PAGE_LIMIT_EXCEEDED",
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Auth { status, message } => {
                write!(f, "auth error status={status}: {message}")
            }
            UpstreamError::Network(msg) => write!(f, "network error: {msg}"),
            UpstreamError::WorkspaceSwitch {
                workspace_id,
                status,
                message,
            } => write!(
                f,
                "workspace switch failed workspace_id={workspace_id} status={status}: {message}"
            ),
            UpstreamError::Api { status, message } => {
                write!(f, "upstream api error status={status}: {message}")
            }
            UpstreamError::Decode(msg) => write!(f, "decode error: {msg}"),
            UpstreamError::PageLimitExceeded { max_pages } => {
                write!(f, "page limit exceeded: more than {max_pages} pages")
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Which call produced a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    ListWorkspaces,
    Switch { workspace_id: i64 },
    FetchPage,
}

/// Map a non-success HTTP status to the taxonomy.
pub fn classify_status(status: u16, call: CallKind, body: &str) -> UpstreamError {
    let message = truncate(body, 200);
    match status {
        401 | 403 => UpstreamError::Auth { status, message },
        408 | 429 | 500..=599 => UpstreamError::Network(format!("status={status}: {message}")),
        _ => match call {
            CallKind::Switch { workspace_id } => UpstreamError::WorkspaceSwitch {
                workspace_id,
                status,
                message,
            },
            CallKind::ListWorkspaces | CallKind::FetchPage => {
                UpstreamError::Api { status, message }
            }
        },
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let t = s.trim();
    match t.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &t[..idx]),
        None => t.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_fatal_on_every_call() {
        for call in [
            CallKind::ListWorkspaces,
            CallKind::Switch { workspace_id: 7 },
            CallKind::FetchPage,
        ] {
            for status in [401, 403] {
                let e = classify_status(status, call, "nope");
                assert!(e.is_fatal(), "{status} on {call:?}");
                assert!(!e.is_retryable());
            }
        }
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        for status in [408, 429, 500, 502, 503, 504] {
            let e = classify_status(status, CallKind::FetchPage, "");
            assert!(e.is_retryable(), "{status}");
            assert!(!e.is_fatal());
        }
    }

    #[test]
    fn other_switch_failures_are_workspace_scoped() {
        let e = classify_status(422, CallKind::Switch { workspace_id: 9 }, "unknown team");
        assert_eq!(
            e,
            UpstreamError::WorkspaceSwitch {
                workspace_id: 9,
                status: 422,
                message: "unknown team".to_string()
            }
        );
        assert!(!e.is_retryable());
        assert!(!e.is_fatal());
    }

    #[test]
    fn other_fetch_failures_are_api_errors() {
        let e = classify_status(404, CallKind::FetchPage, "");
        assert_eq!(e.code(), "API");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let UpstreamError::Api { message, .. } = classify_status(400, CallKind::FetchPage, &body)
        else {
            panic!("expected api error");
        };
        assert_eq!(message.len(), 203);
    }

    #[test]
    fn display_includes_status() {
        let e = UpstreamError::Auth {
            status: 401,
            message: "invalid token".into(),
        };
        assert_eq!(e.to_string(), "auth error status=401: invalid token");
    }
}
