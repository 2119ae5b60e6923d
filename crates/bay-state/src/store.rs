//! StateStore — redb-backed persistence for bays and baymodels.
//!
//! Provides typed CRUD operations plus the conditional writes the
//! conductor relies on for its concurrency guard. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(BAYS).map_err(map_err!(Table))?;
        txn.open_table(BAYMODELS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic readers ────────────────────────────────────────────

    fn get_record<T: DeserializeOwned>(&self, def: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Collect every record accepted by `keep`, in key order.
    fn scan<T: DeserializeOwned>(&self, def: Table, keep: impl Fn(&T) -> bool) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T = decode(value.value())?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// One page of records with keys strictly after `marker`.
    ///
    /// `next_marker` is set to the last returned key when the page is full,
    /// so a caller keeps paging until it sees `None`.
    fn scan_page<T: DeserializeOwned>(
        &self,
        def: Table,
        marker: Option<&str>,
        limit: usize,
        keep: impl Fn(&T) -> bool,
    ) -> StateResult<Page<T>> {
        if limit == 0 {
            return Ok(Page::empty());
        }
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut items = Vec::new();
        let mut last_key = None;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if marker.is_some_and(|m| key <= m) {
                continue;
            }
            let record: T = decode(value.value())?;
            if !keep(&record) {
                continue;
            }
            items.push(record);
            last_key = Some(key.to_string());
            if items.len() >= limit {
                break;
            }
        }
        let next_marker = if items.len() >= limit { last_key } else { None };
        Ok(Page { items, next_marker })
    }

    // ── BayModels ──────────────────────────────────────────────────

    /// Insert a new baymodel. Fails with `Conflict` if the UUID is taken.
    pub fn insert_baymodel(&self, model: &BayModel) -> StateResult<()> {
        let value = serde_json::to_vec(model).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BAYMODELS).map_err(map_err!(Table))?;
            if table.get(model.uuid.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!(
                    "baymodel {} already exists",
                    model.uuid
                )));
            }
            table
                .insert(model.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(baymodel = %model.uuid, "baymodel stored");
        Ok(())
    }

    /// Get a baymodel by UUID.
    pub fn get_baymodel(&self, uuid: &str) -> StateResult<Option<BayModel>> {
        self.get_record(BAYMODELS, uuid)
    }

    /// All baymodels carrying the given name.
    pub fn find_baymodels_by_name(&self, name: &str) -> StateResult<Vec<BayModel>> {
        self.scan(BAYMODELS, |m: &BayModel| m.name.as_deref() == Some(name))
    }

    /// List baymodels in UUID order.
    pub fn list_baymodels(&self, marker: Option<&str>, limit: usize) -> StateResult<Page<BayModel>> {
        self.scan_page(BAYMODELS, marker, limit, |_: &BayModel| true)
    }

    /// Overwrite a baymodel, provided no bay references it.
    pub fn replace_baymodel_if_unreferenced(&self, model: &BayModel) -> StateResult<()> {
        let value = serde_json::to_vec(model).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut models = txn.open_table(BAYMODELS).map_err(map_err!(Table))?;
            if models.get(model.uuid.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(format!("baymodel {}", model.uuid)));
            }
            let bays = txn.open_table(BAYS).map_err(map_err!(Table))?;
            let referencing = count_referencing(&bays, &model.uuid)?;
            if referencing > 0 {
                return Err(StateError::InUse {
                    baymodel: model.uuid.clone(),
                    bays: referencing,
                });
            }
            models
                .insert(model.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(baymodel = %model.uuid, "baymodel replaced");
        Ok(())
    }

    /// Delete a baymodel, provided no bay references it.
    pub fn delete_baymodel_if_unreferenced(&self, uuid: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut models = txn.open_table(BAYMODELS).map_err(map_err!(Table))?;
            let bays = txn.open_table(BAYS).map_err(map_err!(Table))?;
            let referencing = count_referencing(&bays, uuid)?;
            if referencing > 0 {
                return Err(StateError::InUse {
                    baymodel: uuid.to_string(),
                    bays: referencing,
                });
            }
            if models.remove(uuid).map_err(map_err!(Write))?.is_none() {
                return Err(StateError::NotFound(format!("baymodel {uuid}")));
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(baymodel = %uuid, "baymodel deleted");
        Ok(())
    }

    // ── Bays ───────────────────────────────────────────────────────

    /// Insert a new bay, re-checking in the same transaction that its
    /// baymodel still exists.
    pub fn insert_bay_checked(&self, bay: &Bay) -> StateResult<()> {
        let value = serde_json::to_vec(bay).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let models = txn.open_table(BAYMODELS).map_err(map_err!(Table))?;
            if models
                .get(bay.baymodel_id.as_str())
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound(format!("baymodel {}", bay.baymodel_id)));
            }
            let mut bays = txn.open_table(BAYS).map_err(map_err!(Table))?;
            if bays.get(bay.uuid.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("bay {} already exists", bay.uuid)));
            }
            bays.insert(bay.uuid.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(bay = %bay.uuid, status = %bay.status, "bay stored");
        Ok(())
    }

    /// Get a bay by UUID.
    pub fn get_bay(&self, uuid: &str) -> StateResult<Option<Bay>> {
        self.get_record(BAYS, uuid)
    }

    /// All bays carrying the given name.
    pub fn find_bays_by_name(&self, name: &str) -> StateResult<Vec<Bay>> {
        self.scan(BAYS, |b: &Bay| b.name == name)
    }

    /// List bays matching `filter`, in UUID order.
    pub fn list_bays(
        &self,
        filter: &BayFilter,
        marker: Option<&str>,
        limit: usize,
    ) -> StateResult<Page<Bay>> {
        self.scan_page(BAYS, marker, limit, |b: &Bay| filter.matches(b))
    }

    /// Conditionally update a bay.
    ///
    /// Reads the bay, checks its status is one of `expected`, applies
    /// `mutate`, and writes it back, all inside one write transaction.
    /// Fails with `Conflict` when the status does not match or when
    /// `mutate` tries to change the UUID or an already-assigned stack id.
    pub fn compare_and_swap_bay<F>(&self, uuid: &str, expected: &[BayStatus], mutate: F) -> StateResult<Bay>
    where
        F: FnOnce(&mut Bay),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(BAYS).map_err(map_err!(Table))?;
            let current: Bay = match table.get(uuid).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("bay {uuid}"))),
            };
            if !expected.contains(&current.status) {
                return Err(StateError::Conflict(format!(
                    "bay {uuid} is {}, expected one of {}",
                    current.status,
                    join_statuses(expected)
                )));
            }

            let mut next = current.clone();
            mutate(&mut next);
            if next.uuid != current.uuid {
                return Err(StateError::Conflict(format!("bay {uuid}: uuid is immutable")));
            }
            if current.stack_id.is_some() && next.stack_id != current.stack_id {
                return Err(StateError::Conflict(format!(
                    "bay {uuid}: stack id is immutable once assigned"
                )));
            }

            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(uuid, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(bay = %uuid, status = %updated.status, "bay updated");
        Ok(updated)
    }

    /// Remove a bay if its status is one of `expected`. Returns the removed record.
    pub fn remove_bay_if(&self, uuid: &str, expected: &[BayStatus]) -> StateResult<Bay> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(BAYS).map_err(map_err!(Table))?;
            let current: Bay = match table.get(uuid).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("bay {uuid}"))),
            };
            if !expected.contains(&current.status) {
                return Err(StateError::Conflict(format!(
                    "bay {uuid} is {}, expected one of {}",
                    current.status,
                    join_statuses(expected)
                )));
            }
            table.remove(uuid).map_err(map_err!(Write))?;
            removed = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(bay = %uuid, "bay removed");
        Ok(removed)
    }
}

fn count_referencing<T>(bays: &T, baymodel: &str) -> StateResult<usize>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut count = 0;
    for entry in bays.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let bay: Bay = decode(value.value())?;
        if bay.baymodel_id == baymodel {
            count += 1;
        }
    }
    Ok(count)
}

fn join_statuses(statuses: &[BayStatus]) -> String {
    statuses
        .iter()
        .map(BayStatus::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
