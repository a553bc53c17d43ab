//! src/services/storage_service.rs
//!
//! UserStore: persistence of per-user support state. Production data lives in
//! the MongoDB `users` collection, one document per Telegram user keyed by `id`.
//! Documents written by earlier deployments may carry 32-bit ids and lack
//! newer fields; both are accepted on read.

use crate::models::user::UserData;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{self, Bson, Document, doc},
    options::IndexOptions,
};
use thiserror::Error;
use tracing::{debug, warn};

pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error("encoding user `{id}`: {source}")]
    Encode {
        id: i64,
        #[source]
        source: bson::ser::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage operations the handlers depend on.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look a user up by Telegram id.
    async fn get_user(&self, id: i64) -> StorageResult<Option<UserData>>;

    /// Look up the owner of a forum topic.
    async fn get_by_message_thread_id(&self, thread_id: i64) -> StorageResult<Option<UserData>>;

    /// Insert or replace the record of user `id`.
    async fn update_user(&self, id: i64, data: &UserData) -> StorageResult<()>;

    /// Ids of every stored user.
    async fn get_all_users_ids(&self) -> StorageResult<Vec<i64>>;

    /// Cheap round-trip used by readiness checks.
    async fn ping(&self) -> StorageResult<()>;
}

/// MongoDB-backed [`UserStore`].
#[derive(Clone)]
pub struct MongoUserStore {
    db: Database,
    users: Collection<UserData>,
}

impl MongoUserStore {
    pub fn new(db: Database) -> Self {
        let users = db.collection::<UserData>(USERS_COLLECTION);
        Self { db, users }
    }

    /// Open a client for `uri` and bind to database `db_name`.
    pub async fn connect(uri: &str, db_name: &str) -> StorageResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::new(client.database(db_name)))
    }

    /// Unique index on `id`, plain index on `message_thread_id`.
    pub async fn ensure_indexes(&self) -> StorageResult<()> {
        let by_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_thread = IndexModel::builder()
            .keys(doc! { "message_thread_id": 1 })
            .build();

        self.users.create_index(by_id).await?;
        self.users.create_index(by_thread).await?;
        debug!("Indexes ensured on `{}`", USERS_COLLECTION);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn get_user(&self, id: i64) -> StorageResult<Option<UserData>> {
        Ok(self.users.find_one(doc! { "id": id }).await?)
    }

    async fn get_by_message_thread_id(&self, thread_id: i64) -> StorageResult<Option<UserData>> {
        Ok(self
            .users
            .find_one(doc! { "message_thread_id": thread_id })
            .await?)
    }

    async fn update_user(&self, id: i64, data: &UserData) -> StorageResult<()> {
        let fields = bson::to_document(data).map_err(|source| StorageError::Encode { id, source })?;
        self.users
            .update_one(doc! { "id": id }, doc! { "$set": fields })
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get_all_users_ids(&self) -> StorageResult<Vec<i64>> {
        let cursor = self
            .users
            .clone_with_type::<Document>()
            .find(doc! {})
            .projection(doc! { "id": 1, "_id": 0 })
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;

        Ok(docs
            .iter()
            .filter_map(|d| {
                let id = id_of(d);
                if id.is_none() {
                    warn!("Skipping user document without integer id: {:?}", d);
                }
                id
            })
            .collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

/// Integer `id` of a projected document, whichever width it was stored with.
fn id_of(doc: &Document) -> Option<i64> {
    match doc.get("id")? {
        Bson::Int64(v) => Some(*v),
        Bson::Int32(v) => Some(i64::from(*v)),
        _ => None,
    }
}

/// In-memory [`UserStore`] for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryUserStore {
    users: std::sync::Mutex<std::collections::BTreeMap<i64, UserData>>,
    unresponsive: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryUserStore {
    pub fn with_users(users: impl IntoIterator<Item = UserData>) -> Self {
        let store = Self::default();
        store
            .users
            .lock()
            .unwrap()
            .extend(users.into_iter().map(|u| (u.id, u)));
        store
    }

    pub fn snapshot(&self, id: i64) -> Option<UserData> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    /// Every later `ping` hangs, like a database that stopped answering.
    pub fn stop_answering_pings(&self) {
        self.unresponsive
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_user(&self, id: i64) -> StorageResult<Option<UserData>> {
        Ok(self.snapshot(id))
    }

    async fn get_by_message_thread_id(&self, thread_id: i64) -> StorageResult<Option<UserData>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.message_thread_id == Some(thread_id))
            .cloned())
    }

    async fn update_user(&self, id: i64, data: &UserData) -> StorageResult<()> {
        self.users.lock().unwrap().insert(id, data.clone());
        Ok(())
    }

    async fn get_all_users_ids(&self) -> StorageResult<Vec<i64>> {
        Ok(self.users.lock().unwrap().keys().copied().collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        if self.unresponsive.load(std::sync::atomic::Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
