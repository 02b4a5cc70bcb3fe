// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Record data access, read through the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CacheFacade, PrefixSetting};
use crate::codec::CacheKey;
use crate::types::Result;

pub const RECORD_PREFIX: &str = "records";
pub const RECORD_LOCAL_TTL: Duration = Duration::from_secs(10);
pub const RECORD_SHARED_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub the_num: i64,
    pub the_str: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(the_num: i64, the_str: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            the_num,
            the_str: the_str.into(),
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRecordsOpt {
    pub page: usize,
    /// 0 lists everything.
    pub size: usize,
}

impl ListRecordsOpt {
    fn cache_id(&self) -> String {
        format!("{}-{}", self.page, self.size)
    }
}

/// The origin store behind the records cache.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists `record` with a fresh id and timestamps and returns it.
    async fn create_record(&self, record: Record) -> Result<Record>;

    /// `Ok(None)` when no record has `id`.
    async fn get_record(&self, id: Uuid) -> Result<Option<Record>>;

    async fn list_records(&self, opt: ListRecordsOpt) -> Result<Vec<Record>>;
}

/// Records DAO: writes go to the store, reads go through the cache.
#[derive(Clone)]
pub struct CachedRecordDao {
    store: Arc<dyn RecordStore>,
    cache: CacheFacade,
}

impl CachedRecordDao {
    /// Registers the `records` prefix on `cache` unless it already is.
    pub fn new(store: Arc<dyn RecordStore>, cache: CacheFacade) -> Result<Self> {
        if !cache.registry().contains(RECORD_PREFIX) {
            cache.registry().register(PrefixSetting::new(
                RECORD_PREFIX,
                RECORD_LOCAL_TTL,
                RECORD_SHARED_TTL,
            ))?;
        }
        Ok(Self { store, cache })
    }

    pub async fn create_record(&self, record: Record) -> Result<Record> {
        self.store.create_record(record).await
    }

    pub async fn get_record(&self, id: Uuid) -> Result<Record> {
        let key = CacheKey::new(RECORD_PREFIX, id.to_string())?;
        let store = self.store.clone();

        self.cache
            .get_by_func(&key, move || async move {
                debug!("Loading record {} from store", id);
                store.get_record(id).await
            })
            .await
    }

    pub async fn list_records(&self, opt: ListRecordsOpt) -> Result<Vec<Record>> {
        let key = CacheKey::new(RECORD_PREFIX, opt.cache_id())?;
        let store = self.store.clone();

        self.cache
            .get_by_func(&key, move || async move {
                store.list_records(opt).await.map(Some)
            })
            .await
    }

    pub fn cache(&self) -> &CacheFacade {
        &self.cache
    }
}

/// Store kept in process memory, in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<Record>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_record(&self, mut record: Record) -> Result<Record> {
        let now = Utc::now();
        record.id = Uuid::new_v4();
        record.created_at = Some(now);
        record.updated_at = Some(now);

        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<Record>> {
        Ok(self.records.read().iter().find(|r| r.id == id).cloned())
    }

    async fn list_records(&self, opt: ListRecordsOpt) -> Result<Vec<Record>> {
        let records = self.records.read();
        if opt.size == 0 {
            return Ok(records.clone());
        }
        Ok(records
            .iter()
            .skip(opt.page.saturating_mul(opt.size))
            .take(opt.size)
            .cloned()
            .collect())
    }
}
