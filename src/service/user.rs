use std::sync::Arc;

use super::Core;
use crate::error::{Entity, Error, Result};
use crate::search::{USER_INDEX, user_document};
use crate::types::User;

#[derive(Clone)]
pub struct UserService {
    core: Arc<Core>,
}

impl UserService {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    pub fn find(&self, id: &str) -> Result<User> {
        self.core
            .store
            .get_user(id)?
            .ok_or(Error::NotFound(Entity::User))
    }

    /// Adds a freshly provisioned user to the user index.
    pub async fn index(&self, user: &User) {
        self.core
            .index(USER_INDEX, vec![user_document(user)])
            .await;
    }
}
