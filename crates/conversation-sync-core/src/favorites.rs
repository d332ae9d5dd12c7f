//! Saved listings under `users/{uid}/favorites/{listingId}`.

use std::sync::Arc;

use doc_store::{CollectionPath, DocPath, Direction, DocumentStore, Query, WriteFields};
use tracing::debug;

use crate::error::ChatSyncResult;
use crate::session::SessionContext;
use crate::types::{fields, FavoriteListing, FAVORITES_COLLECTION, USERS_COLLECTION};

/// The session user's saved listings.
#[derive(Clone)]
pub struct Favorites {
    store: Arc<dyn DocumentStore>,
    session: SessionContext,
}

impl Favorites {
    pub fn new(store: Arc<dyn DocumentStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    fn collection(&self) -> CollectionPath {
        CollectionPath::root(USERS_COLLECTION)
            .doc(self.session.user_id().as_str())
            .child(FAVORITES_COLLECTION)
    }

    fn path(&self, listing_id: &str) -> DocPath {
        self.collection().doc(listing_id)
    }

    /// Saves `listing`, stamping `savedAt` with the server time. Saving an
    /// already-saved listing refreshes it.
    pub async fn save(&self, listing: &FavoriteListing) -> ChatSyncResult<()> {
        let mut write = WriteFields::new()
            .set(fields::LISTING_ID, listing.listing_id.as_str())
            .set(fields::TITLE, listing.title.as_str());
        for (key, value) in &listing.details {
            write = write.set(key.as_str(), value.clone());
        }
        write = write.server_timestamp(fields::SAVED_AT);

        self.store.upsert(&self.path(&listing.listing_id), write).await?;
        debug!(user_id = %self.session.user_id(), listing_id = %listing.listing_id, "favorite saved");
        Ok(())
    }

    /// Removes a saved listing. Removing one that is not saved succeeds.
    pub async fn remove(&self, listing_id: &str) -> ChatSyncResult<()> {
        self.store.delete(&self.path(listing_id)).await?;
        debug!(user_id = %self.session.user_id(), listing_id, "favorite removed");
        Ok(())
    }

    /// Saved listings, most recently saved first.
    pub async fn list(&self) -> ChatSyncResult<Vec<FavoriteListing>> {
        let query = Query::new(self.collection()).order_by(fields::SAVED_AT, Direction::Desc);
        let snapshot = self.store.query(&query).await?;
        Ok(snapshot
            .documents
            .iter()
            .map(FavoriteListing::from_document)
            .collect())
    }

    pub async fn is_saved(&self, listing_id: &str) -> ChatSyncResult<bool> {
        Ok(self.store.get(&self.path(listing_id)).await?.is_some())
    }
}

impl std::fmt::Debug for Favorites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Favorites")
            .field("user_id", self.session.user_id())
            .finish()
    }
}
