use thiserror::Error;

// Aliased: thiserror treats any field typed `Backtrace` as std's backtrace.
use crate::backtrace::{Backtrace as Trace, Frame};

/// Canonical result for the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed term, undefined variable, arity or type mismatch. Reported to
    /// the client verbatim.
    #[error("{message}")]
    Query { message: String, frames: Trace },

    /// A hard resource ceiling was hit (e.g. sort buffer). Same channel as
    /// `Query`.
    #[error("{message}")]
    ResourceLimit { message: String, frames: Trace },

    #[error("Query interrupted.")]
    Interrupted,

    /// The storage collaborator could not run a read or write.
    #[error("cannot perform query: {0}")]
    CannotPerformQuery(String),

    #[error("unknown cursor {0}")]
    UnknownCursor(u64),

    #[error("invalid configuration: {0}")]
    Config(String),

    // Unreachable in correct code; aborts the request path.
    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn query(message: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
            frames: Trace::new(),
        }
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Error::ResourceLimit {
            message: message.into(),
            frames: Trace::new(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Error::Invariant(message.into())
    }

    /// Standard type mismatch message shared by datums and values.
    pub fn type_mismatch(expected: &str, found: &str) -> Self {
        Error::query(format!("Expected type {expected} but found {found}."))
    }

    /// Prepend a backtrace frame; no-op for errors that carry no position.
    pub fn with_frame(mut self, frame: Frame) -> Self {
        match &mut self {
            Error::Query { frames, .. } | Error::ResourceLimit { frames, .. } => {
                frames.push_front(frame)
            }
            _ => {}
        }
        self
    }

    pub fn backtrace(&self) -> Option<&Trace> {
        match self {
            Error::Query { frames, .. } | Error::ResourceLimit { frames, .. } => Some(frames),
            _ => None,
        }
    }

    /// True for errors a batch write may capture per item instead of aborting.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::Query { .. } | Error::ResourceLimit { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::query(format!("malformed document: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_only_attach_to_positioned_errors() {
        let e = Error::query("bad").with_frame(Frame::Pos(2));
        assert_eq!(e.backtrace().unwrap().frames(), &[Frame::Pos(2)]);
        assert!(e.is_user_error());

        let e = Error::Interrupted.with_frame(Frame::Pos(2));
        assert!(e.backtrace().is_none());
        assert!(!e.is_user_error());
        assert_eq!(e.to_string(), "Query interrupted.");
    }

    #[test]
    fn positioned_errors_are_plain_std_errors() {
        let e = Error::resource_limit("Array over size limit `2`.")
            .with_frame(Frame::Pos(1))
            .with_frame(Frame::Opt("index".into()));
        let dyn_err: &dyn std::error::Error = &e;
        assert!(dyn_err.source().is_none());
        assert_eq!(dyn_err.to_string(), "Array over size limit `2`.");
        let frames = e.backtrace().unwrap();
        assert_eq!(frames.to_string(), "index -> 1");
        match e.clone() {
            Error::ResourceLimit { frames: copy, .. } => assert_eq!(&copy, frames),
            other => panic!("unexpected {other:?}"),
        }
    }
}
