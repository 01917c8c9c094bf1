//! The resource-with-asset manager.
//!
//! One generic implementation drives all four catalog resources; the
//! [`Resource`] descriptor contributes the table selector, the validation
//! rule table and the record plumbing, so the lifecycle ordering lives in
//! exactly one place:
//!
//! * nothing is mutated until validation has fully passed;
//! * on create, a storage failure rolls the fresh record back so no record
//!   ever points at an asset that never landed;
//! * on replace, the new asset is stored before the old one is deleted, and
//!   a failed delete of the old asset is logged, not fatal;
//! * on delete, asset removal is idempotent and never blocks removal of
//!   the record itself.

use std::sync::Arc;

use async_trait::async_trait;
use catalog_db::{
    CardRecord, CardState, CardTable, Database, ItemRecord, ItemStatus, ItemTable, NewCard,
    NewItem,
};
use chrono::NaiveDate;
use tracing::warn;

use crate::store::{asset_key, AssetStore};
use crate::validation::{is_image, Mode, RawFields, ValidationErrors, Validator};
use crate::{CoreError, Upload};

/// Descriptor wiring one resource family into the generic manager.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type Record: Send + Sync + 'static;
    type Draft: Send;
    type Patch: Send;

    /// Noun used in not-found messages ("card", "item", ...).
    fn noun(&self) -> &'static str;
    /// Prefix woven into generated asset keys.
    fn key_prefix(&self) -> &'static str;

    fn validate_create(&self, fields: &RawFields) -> Result<Self::Draft, ValidationErrors>;
    fn validate_patch(&self, fields: &RawFields) -> Result<Self::Patch, ValidationErrors>;

    async fn insert(&self, db: &Database, draft: Self::Draft) -> anyhow::Result<Self::Record>;
    async fn fetch(&self, db: &Database, id: i64) -> anyhow::Result<Option<Self::Record>>;
    async fn list(&self, db: &Database) -> anyhow::Result<Vec<Self::Record>>;
    async fn persist(&self, db: &Database, record: &Self::Record) -> anyhow::Result<()>;
    async fn remove(&self, db: &Database, id: i64) -> anyhow::Result<bool>;

    fn apply(&self, record: &mut Self::Record, patch: Self::Patch);
    fn id(&self, record: &Self::Record) -> i64;
    fn img<'a>(&self, record: &'a Self::Record) -> Option<&'a str>;
    fn bind_img(&self, record: &mut Self::Record, key: String);
}

/// Coordinates validated record mutation with asset lifecycle management.
pub struct ResourceManager<R: Resource> {
    db: Database,
    store: Arc<dyn AssetStore>,
    resource: R,
}

impl<R: Resource> ResourceManager<R> {
    pub fn new(db: Database, store: Arc<dyn AssetStore>, resource: R) -> Self {
        Self { db, store, resource }
    }

    /// The backend in use, for resolving stored keys at read time.
    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// All records, unfiltered, in storage order.
    pub async fn list(&self) -> Result<Vec<R::Record>, CoreError> {
        Ok(self.resource.list(&self.db).await?)
    }

    /// Validates and persists a new record with its mandatory image.
    pub async fn create(
        &self,
        fields: &RawFields,
        upload: Option<Upload>,
    ) -> Result<R::Record, CoreError> {
        let mut errors = ValidationErrors::new();
        let draft = match self.resource.validate_create(fields) {
            Ok(draft) => Some(draft),
            Err(field_errors) => {
                errors = field_errors;
                None
            }
        };
        check_upload(&mut errors, upload.as_ref(), true);

        let (draft, upload) = match (draft, upload) {
            (Some(draft), Some(upload)) if errors.is_empty() => (draft, upload),
            _ => return Err(CoreError::Validation(errors)),
        };

        let mut record = self.resource.insert(&self.db, draft).await?;
        let id = self.resource.id(&record);
        let key = asset_key(self.resource.key_prefix(), id, &upload.filename);

        if let Err(err) = self.store.store(&key, &upload.bytes).await {
            // The record must not survive pointing at an asset that never
            // landed; roll it back and surface the storage failure.
            if let Err(cleanup) = self.resource.remove(&self.db, id).await {
                warn!(%cleanup, id, noun = self.resource.noun(),
                    "failed to roll back record after asset store failure");
            }
            return Err(err.into());
        }

        self.resource.bind_img(&mut record, key);
        self.resource.persist(&self.db, &record).await?;
        // Reload so the caller sees the authoritative row (fresh timestamps).
        self.retrieve(id).await
    }

    /// Fetches one record or fails with `NotFound`.
    pub async fn retrieve(&self, id: i64) -> Result<R::Record, CoreError> {
        self.resource
            .fetch(&self.db, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(self.resource.noun(), id))
    }

    /// Partial update, optionally replacing the bound asset.
    pub async fn update(
        &self,
        id: i64,
        fields: &RawFields,
        upload: Option<Upload>,
    ) -> Result<R::Record, CoreError> {
        let mut record = self.retrieve(id).await?;

        let mut errors = ValidationErrors::new();
        let patch = match self.resource.validate_patch(fields) {
            Ok(patch) => Some(patch),
            Err(field_errors) => {
                errors = field_errors;
                None
            }
        };
        check_upload(&mut errors, upload.as_ref(), false);

        let patch = match patch {
            Some(patch) if errors.is_empty() => patch,
            _ => return Err(CoreError::Validation(errors)),
        };

        if let Some(upload) = upload {
            let key = asset_key(self.resource.key_prefix(), id, &upload.filename);
            // Store the replacement first: if the backend is down, the record
            // keeps its old, still-reachable asset.
            self.store.store(&key, &upload.bytes).await?;

            if let Some(old) = self.resource.img(&record).map(str::to_owned) {
                if let Err(err) = self.store.delete(&old).await {
                    warn!(%err, key = %old, "failed to delete replaced asset");
                }
            }
            self.resource.bind_img(&mut record, key);
        }

        self.resource.apply(&mut record, patch);
        self.resource.persist(&self.db, &record).await?;
        self.retrieve(id).await
    }

    /// Removes the record and its bound asset.
    pub async fn delete(&self, id: i64) -> Result<(), CoreError> {
        let record = self.retrieve(id).await?;

        if let Some(key) = self.resource.img(&record) {
            // Idempotent, and non-fatal: a flaky backend must not make the
            // record undeletable.
            if let Err(err) = self.store.delete(key).await {
                warn!(%err, key, "failed to delete asset of removed record");
            }
        }

        if !self.resource.remove(&self.db, id).await? {
            return Err(CoreError::NotFound(self.resource.noun(), id));
        }
        Ok(())
    }
}

/// Image policy: mandatory on create, optional on update, and any supplied
/// payload must actually be an image.
fn check_upload(errors: &mut ValidationErrors, upload: Option<&Upload>, required: bool) {
    match upload {
        None if required => {
            errors
                .entry("img".to_string())
                .or_default()
                .push("The img field is required.".to_string());
        }
        Some(upload) if !is_image(&upload.bytes) => {
            errors
                .entry("img".to_string())
                .or_default()
                .push("The img field must be an image.".to_string());
        }
        _ => {}
    }
}

/// Card family descriptor (English or Spanish table).
pub struct CardResource {
    table: CardTable,
}

impl CardResource {
    pub fn new(table: CardTable) -> Self {
        Self { table }
    }
}

#[derive(Debug)]
pub struct CardDraft {
    title: String,
    state: CardState,
    date: NaiveDate,
    description: Option<String>,
}

#[derive(Debug, Default)]
pub struct CardPatch {
    title: Option<String>,
    state: Option<CardState>,
    date: Option<NaiveDate>,
    description: Option<Option<String>>,
}

#[async_trait]
impl Resource for CardResource {
    type Record = CardRecord;
    type Draft = CardDraft;
    type Patch = CardPatch;

    fn noun(&self) -> &'static str {
        "card"
    }

    fn key_prefix(&self) -> &'static str {
        self.table.key_prefix()
    }

    fn validate_create(&self, fields: &RawFields) -> Result<CardDraft, ValidationErrors> {
        let mut v = Validator::new(fields, Mode::Create);
        let title = v.string("title", 255);
        let state = v.one_of::<CardState>("state");
        let date = v.date("date");
        let description = v.nullable_text("description");
        let errors = v.finish();

        match (title, state, date) {
            (Some(title), Some(state), Some(date)) if errors.is_empty() => Ok(CardDraft {
                title,
                state,
                date,
                description: description.flatten(),
            }),
            _ => Err(errors),
        }
    }

    fn validate_patch(&self, fields: &RawFields) -> Result<CardPatch, ValidationErrors> {
        let mut v = Validator::new(fields, Mode::Update);
        let patch = CardPatch {
            title: v.string("title", 255),
            state: v.one_of::<CardState>("state"),
            date: v.date("date"),
            description: v.nullable_text("description"),
        };
        let errors = v.finish();
        if errors.is_empty() {
            Ok(patch)
        } else {
            Err(errors)
        }
    }

    async fn insert(&self, db: &Database, draft: CardDraft) -> anyhow::Result<CardRecord> {
        db.insert_card(
            self.table,
            NewCard {
                title: &draft.title,
                state: draft.state,
                date: draft.date,
                description: draft.description.as_deref(),
            },
        )
        .await
    }

    async fn fetch(&self, db: &Database, id: i64) -> anyhow::Result<Option<CardRecord>> {
        db.fetch_card(self.table, id).await
    }

    async fn list(&self, db: &Database) -> anyhow::Result<Vec<CardRecord>> {
        db.list_cards(self.table).await
    }

    async fn persist(&self, db: &Database, record: &CardRecord) -> anyhow::Result<()> {
        db.update_card(self.table, record).await
    }

    async fn remove(&self, db: &Database, id: i64) -> anyhow::Result<bool> {
        db.delete_card(self.table, id).await
    }

    fn apply(&self, record: &mut CardRecord, patch: CardPatch) {
        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(state) = patch.state {
            record.state = state;
        }
        if let Some(date) = patch.date {
            record.date = date;
        }
        if let Some(description) = patch.description {
            record.description = description;
        }
    }

    fn id(&self, record: &CardRecord) -> i64 {
        record.id
    }

    fn img<'a>(&self, record: &'a CardRecord) -> Option<&'a str> {
        record.img.as_deref()
    }

    fn bind_img(&self, record: &mut CardRecord, key: String) {
        record.img = Some(key);
    }
}

/// Item family descriptor (English or Spanish table).
pub struct ItemResource {
    table: ItemTable,
}

impl ItemResource {
    pub fn new(table: ItemTable) -> Self {
        Self { table }
    }
}

#[derive(Debug)]
pub struct ItemDraft {
    title: String,
    price: f64,
    status: ItemStatus,
}

#[derive(Debug, Default)]
pub struct ItemPatch {
    title: Option<String>,
    price: Option<f64>,
    status: Option<ItemStatus>,
}

#[async_trait]
impl Resource for ItemResource {
    type Record = ItemRecord;
    type Draft = ItemDraft;
    type Patch = ItemPatch;

    fn noun(&self) -> &'static str {
        "item"
    }

    fn key_prefix(&self) -> &'static str {
        self.table.key_prefix()
    }

    fn validate_create(&self, fields: &RawFields) -> Result<ItemDraft, ValidationErrors> {
        let mut v = Validator::new(fields, Mode::Create);
        let title = v.string("title", 255);
        let price = v.numeric("price");
        let status = v.one_of::<ItemStatus>("status");
        let errors = v.finish();

        match (title, price, status) {
            (Some(title), Some(price), Some(status)) if errors.is_empty() => Ok(ItemDraft {
                title,
                price,
                status,
            }),
            _ => Err(errors),
        }
    }

    fn validate_patch(&self, fields: &RawFields) -> Result<ItemPatch, ValidationErrors> {
        let mut v = Validator::new(fields, Mode::Update);
        let patch = ItemPatch {
            title: v.string("title", 255),
            price: v.numeric("price"),
            status: v.one_of::<ItemStatus>("status"),
        };
        let errors = v.finish();
        if errors.is_empty() {
            Ok(patch)
        } else {
            Err(errors)
        }
    }

    async fn insert(&self, db: &Database, draft: ItemDraft) -> anyhow::Result<ItemRecord> {
        db.insert_item(
            self.table,
            NewItem {
                title: &draft.title,
                price: draft.price,
                status: draft.status,
            },
        )
        .await
    }

    async fn fetch(&self, db: &Database, id: i64) -> anyhow::Result<Option<ItemRecord>> {
        db.fetch_item(self.table, id).await
    }

    async fn list(&self, db: &Database) -> anyhow::Result<Vec<ItemRecord>> {
        db.list_items(self.table).await
    }

    async fn persist(&self, db: &Database, record: &ItemRecord) -> anyhow::Result<()> {
        db.update_item(self.table, record).await
    }

    async fn remove(&self, db: &Database, id: i64) -> anyhow::Result<bool> {
        db.delete_item(self.table, id).await
    }

    fn apply(&self, record: &mut ItemRecord, patch: ItemPatch) {
        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(price) = patch.price {
            record.price = price;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
    }

    fn id(&self, record: &ItemRecord) -> i64 {
        record.id
    }

    fn img<'a>(&self, record: &'a ItemRecord) -> Option<&'a str> {
        record.img.as_deref()
    }

    fn bind_img(&self, record: &mut ItemRecord, key: String) {
        record.img = Some(key);
    }
}
