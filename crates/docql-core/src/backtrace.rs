//! Source positions attached to user-facing errors.
//!
//! A backtrace is the path from the root term down to the term that failed:
//! each frame is either a positional argument index or an optional-argument
//! name. Frames are prepended as the error unwinds through parent terms.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Pos(u32),
    Opt(String),
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Pos(i) => write!(f, "{i}"),
            Frame::Opt(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Backtrace {
    frames: Vec<Frame>,
}

impl Backtrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Record that the failing term sat under `frame` of its parent.
    pub fn push_front(&mut self, frame: Frame) {
        self.frames.insert(0, frame);
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{frame}")?;
        }
        Ok(())
    }
}
