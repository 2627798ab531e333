use crate::database::error::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    /// The four canonical roots could not all be established; nothing below
    /// them can be trusted, so repair aborts.
    #[error("root nodes missing: {missing}")]
    RootNodesMissing { missing: String },

    #[error("canonical Hosts folder not found (expected exactly one, found {found})")]
    HostsFolderMissing { found: usize },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
