//! What a client receives for each request.

use serde::{Deserialize, Serialize};

use docql_core::backtrace::Backtrace;
use docql_core::datum::Datum;
use docql_core::error::Error;
use docql_core::id::CursorToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    /// More data remains; ask again with the same token.
    Partial,
    /// Final batch. The cursor is closed.
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    Query,
    ResourceLimit,
    Interrupted,
    Unavailable,
    UnknownCursor,
    Config,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub class: ErrorClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Backtrace::is_empty")]
    pub backtrace: Backtrace,
}

impl From<&Error> for ErrorInfo {
    fn from(e: &Error) -> Self {
        let class = match e {
            Error::Query { .. } => ErrorClass::Query,
            Error::ResourceLimit { .. } => ErrorClass::ResourceLimit,
            Error::Interrupted => ErrorClass::Interrupted,
            Error::CannotPerformQuery(_) => ErrorClass::Unavailable,
            Error::UnknownCursor(_) => ErrorClass::UnknownCursor,
            Error::Config(_) => ErrorClass::Config,
            Error::Invariant(_) => ErrorClass::Internal,
        };
        Self {
            class,
            message: e.to_string(),
            backtrace: e.backtrace().cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub token: CursorToken,
    pub kind: ResponseKind,
    #[serde(default)]
    pub data: Vec<Datum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Response {
    pub fn partial(token: CursorToken, data: Vec<Datum>) -> Self {
        Self {
            token,
            kind: ResponseKind::Partial,
            data,
            error: None,
        }
    }

    pub fn success(token: CursorToken, data: Vec<Datum>) -> Self {
        Self {
            token,
            kind: ResponseKind::Success,
            data,
            error: None,
        }
    }

    pub fn error(token: CursorToken, err: &Error) -> Self {
        Self {
            token,
            kind: ResponseKind::Error,
            data: Vec::new(),
            error: Some(ErrorInfo::from(err)),
        }
    }

    pub fn is_final(&self) -> bool {
        self.kind != ResponseKind::Partial
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
