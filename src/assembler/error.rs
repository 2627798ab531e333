use crate::database::error::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("firewall {firewall} does not belong to fwcloud {fwcloud}")]
    WrongTenant { firewall: i64, fwcloud: i64 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AssembleError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}
