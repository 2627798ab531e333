use crate::database::error::DatabaseError;
use crate::position::{ObjectType, RulePosition};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("object type {obj_type:?} is not allowed in position {position:?}")]
    InvalidPosition {
        position: RulePosition,
        obj_type: ObjectType,
    },

    #[error("position {position:?} does not exist for rule {rule_id}")]
    InvalidSlot {
        position: RulePosition,
        rule_id: i64,
    },

    #[error("unknown object type code {code} on object {id}")]
    UnknownObjectType { code: i64, id: i64 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RuleError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}
