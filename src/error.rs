use thiserror::Error;

// Define our own Result type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error")]
    Json(#[from] serde_json::Error),

    // Module-specific errors that will be converted from module error types
    #[error(transparent)]
    DatabaseModule(#[from] crate::database::error::DatabaseError),

    #[error(transparent)]
    RulesModule(#[from] crate::rules::error::RuleError),

    #[error(transparent)]
    AssemblerModule(#[from] crate::assembler::error::AssembleError),

    #[error(transparent)]
    CompilerModule(#[from] crate::compiler::error::CompileError),

    #[error(transparent)]
    TreeModule(#[from] crate::tree::error::TreeError),
}

impl Error {
    /// Whether the error maps to a "not found" condition at the API boundary.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DatabaseModule(e) => {
                matches!(e, crate::database::error::DatabaseError::NotFound { .. })
            }
            Self::RulesModule(e) => {
                matches!(e, crate::rules::error::RuleError::NotFound { .. })
            }
            Self::AssemblerModule(e) => {
                matches!(e, crate::assembler::error::AssembleError::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Whether the error is a validation/compatibility failure rather than a
    /// missing entity or an internal fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::RulesModule(crate::rules::error::RuleError::InvalidPosition { .. })
        )
    }
}
