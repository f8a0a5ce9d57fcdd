//! Grant store repositories.
//!
//! All SQL for the authorization entities lives here, split by entity
//! family. One [`AuthzRepository`] struct carries the pool; mutating service
//! operations pass their own transaction so grant writes, change history and
//! audit commit atomically.

mod delegations;
mod grants;
mod history;
mod matrix;
mod permissions;
mod policies;
mod roles;
mod tracking;

use authz_core::DatabasePool;

pub use matrix::MatrixRow;

#[derive(Clone)]
pub struct AuthzRepository {
    db: DatabasePool,
}

impl AuthzRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabasePool {
        &self.db
    }
}
