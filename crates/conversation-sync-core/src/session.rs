//! Session context.

use chrono::{DateTime, Utc};

use crate::types::UserId;

/// The signed-in user for one session.
///
/// Supplied by the authentication collaborator and passed explicitly to
/// every component that acts on the user's behalf. It never changes during
/// a session; switching users means starting a new session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    user_id: UserId,
    started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            started_at: Utc::now(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
