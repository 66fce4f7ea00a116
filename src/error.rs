use crate::types::FlowNode;
use reqwest::StatusCode;
use std::fmt::Display;
use thiserror::Error;

/// Data-only discriminant of a `SourceError`, kept in branch error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Malformed,
    NotFound,
    RateLimited,
    Transient,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Malformed => "malformed",
            ErrorKind::NotFound => "not found",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::Transient => "transient",
        };
        f.write_str(name)
    }
}

/// Failure of a single upstream lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The identifier failed the source's format check; nothing was sent.
    #[error("Malformed identifier: {0}")]
    Malformed(String),

    #[error("Not found upstream: {0}")]
    NotFound(String),

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Upstream failure: {0}")]
    Transient(String),
}

impl SourceError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::Malformed => SourceError::Malformed(detail),
            ErrorKind::NotFound => SourceError::NotFound(detail),
            ErrorKind::RateLimited => SourceError::RateLimited(detail),
            ErrorKind::Transient => SourceError::Transient(detail),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Malformed(_) => ErrorKind::Malformed,
            SourceError::NotFound(_) => ErrorKind::NotFound,
            SourceError::RateLimited(_) => ErrorKind::RateLimited,
            SourceError::Transient(_) => ErrorKind::Transient,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            SourceError::Malformed(detail)
            | SourceError::NotFound(detail)
            | SourceError::RateLimited(detail)
            | SourceError::Transient(detail) => detail,
        }
    }

    /// Maps a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status: StatusCode, what: impl Display) -> Self {
        match status {
            StatusCode::NOT_FOUND => SourceError::NotFound(format!("{what}")),
            StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(format!("{what}")),
            _ => SourceError::Transient(format!("{what}: HTTP {status}")),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SourceError::from_status(status, &err),
            None => SourceError::Transient(err.to_string()),
        }
    }
}

///
/// BranchError
///
/// A failure contained at one node of the crawl. The crawl carries on past it.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchError {
    pub node: FlowNode,
    pub kind: ErrorKind,
    pub detail: String,
}

impl BranchError {
    pub fn new(node: impl Into<FlowNode>, err: &SourceError) -> Self {
        Self {
            node: node.into(),
            kind: err.kind(),
            detail: err.detail().to_string(),
        }
    }
}

impl Display for BranchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.node, self.kind, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    #[test]
    fn http_statuses_map_onto_kinds() {
        assert_eq!(
            SourceError::from_status(StatusCode::NOT_FOUND, "rawtx").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, "rawtx").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            SourceError::from_status(StatusCode::BAD_GATEWAY, "rawtx").kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn branch_error_keeps_kind_and_detail() {
        let err = SourceError::new(ErrorKind::NotFound, "no such transaction");
        let branch = BranchError::new(TransactionId::from("abc"), &err);
        assert_eq!(branch.kind, ErrorKind::NotFound);
        assert_eq!(branch.detail, "no such transaction");
        assert_eq!(branch.to_string(), "tx:abc (not found): no such transaction");
    }
}
