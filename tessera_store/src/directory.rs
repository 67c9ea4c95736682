use std::collections::HashMap;

use async_trait::async_trait;

use crate::{StoreError, UserId, UserIdRef};

/// What a subject is allowed to do, as embedded in its access tokens
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Grants {
    /// Role names
    pub roles: Vec<String>,
    /// Permission names
    pub permissions: Vec<String>,
}

/// Looks up the current grants of a subject
///
/// Access tokens minted on refresh carry whatever the directory says at that
/// moment, so a change of roles takes effect at the next rotation. A subject
/// that no longer exists yields `None` and cannot be issued tokens.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// The grants of `user`, or `None` if the user is unknown
    async fn grants(&self, user: &UserIdRef) -> Result<Option<Grants>, StoreError>;
}

/// A fixed directory, mainly useful in tests
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    subjects: HashMap<UserId, Grants>,
}

impl StaticDirectory {
    /// An empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a subject
    pub fn with_subject(mut self, user: UserId, grants: Grants) -> Self {
        self.subjects.insert(user, grants);
        self
    }
}

#[async_trait]
impl SubjectDirectory for StaticDirectory {
    async fn grants(&self, user: &UserIdRef) -> Result<Option<Grants>, StoreError> {
        Ok(self.subjects.get(user).cloned())
    }
}
