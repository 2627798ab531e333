use crate::database::error::DatabaseError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    /// A single rule failed to render. Isolated: the batch keeps going and
    /// the failure is recorded on that rule's segment.
    #[error("rule {rule_id} failed to compile: {message}")]
    Segment { rule_id: i64, message: String },

    /// A required header/footer template could not be read. Fatal for the
    /// whole compile.
    #[error("cannot read template {}: {source}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output stream failed. Fatal; the partial artifact is invalid.
    #[error("cannot write script {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl CompileError {
    pub fn segment(rule_id: i64, message: impl Into<String>) -> Self {
        Self::Segment {
            rule_id,
            message: message.into(),
        }
    }

    pub fn template(path: &Path, source: std::io::Error) -> Self {
        Self::Template {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn output(path: &Path, source: std::io::Error) -> Self {
        Self::Output {
            path: path.to_path_buf(),
            source,
        }
    }
}
