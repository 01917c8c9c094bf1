//! JSON response DTOs.
//!
//! Records store the asset *key*; responses carry the resolved retrieval
//! reference (a `/storage/...` path for the local backend, an object URL for
//! S3), so clients never see backend-specific key conventions.

use catalog_core::AssetStore;
use catalog_db::{CardRecord, CardState, ItemRecord, ItemStatus};
use serde::Serialize;

/// Conversion from a persisted record into its API representation.
pub trait ApiRecord {
    type Response: Serialize;

    fn into_api(self, store: &dyn AssetStore) -> Self::Response;
}

#[derive(Debug, Serialize)]
pub struct CardResponse {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    pub state: CardState,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ApiRecord for CardRecord {
    type Response = CardResponse;

    fn into_api(self, store: &dyn AssetStore) -> CardResponse {
        CardResponse {
            id: self.id,
            title: self.title,
            img: self.img.as_deref().map(|key| store.resolve(key)),
            state: self.state,
            date: self.date.to_string(),
            description: self.description,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    pub price: f64,
    pub status: ItemStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl ApiRecord for ItemRecord {
    type Response = ItemResponse;

    fn into_api(self, store: &dyn AssetStore) -> ItemResponse {
        ItemResponse {
            id: self.id,
            title: self.title,
            img: self.img.as_deref().map(|key| store.resolve(key)),
            price: self.price,
            status: self.status,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}
