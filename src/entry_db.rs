use std::path::Path;

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};

use crate::{
    entry::{Entry, EntryDraft},
    error::{Error, Result},
};

const ENTRIES: TableDefinition<u64, &[u8]> = TableDefinition::new("entries");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ENTRY_ID: &str = "next_entry_id";

/// Persistent record store for knowledge-base entries.
///
/// Entries are stored as JSON under their numeric id. Ids are assigned from
/// a counter kept in the same database, so an id is never reused even after
/// the entry holding it was removed.
pub struct EntryDb {
    db: Database,
}

impl EntryDb {
    /// Open or create an entry database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use kbseek::EntryDb;
    ///
    /// let db = EntryDb::open(&tmp.path().join("entries.redb")).unwrap();
    /// assert_eq!(db.count().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(ENTRIES)?;
        txn.open_table(SETTINGS)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Entries --

    /// Store a new entry, assigning it the next free id.
    pub fn insert(&self, draft: EntryDraft, now: u64) -> Result<Entry> {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut meta = txn.open_table(META)?;
            let id = meta.get(NEXT_ENTRY_ID)?.map(|v| v.value()).unwrap_or(1);
            meta.insert(NEXT_ENTRY_ID, id + 1)?;

            let entry = Entry::from_draft(id, now, draft);
            let bytes = serde_json::to_vec(&entry)?;
            let mut table = txn.open_table(ENTRIES)?;
            table.insert(id, bytes.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    /// Store many new entries in a single transaction.
    pub fn batch_insert(
        &self,
        drafts: Vec<EntryDraft>,
        now: u64,
    ) -> Result<Vec<Entry>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_write()?;
        let entries = {
            let mut meta = txn.open_table(META)?;
            let mut table = txn.open_table(ENTRIES)?;
            let mut next =
                meta.get(NEXT_ENTRY_ID)?.map(|v| v.value()).unwrap_or(1);

            let mut entries = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let entry = Entry::from_draft(next, now, draft);
                let bytes = serde_json::to_vec(&entry)?;
                table.insert(next, bytes.as_slice())?;
                entries.push(entry);
                next += 1;
            }
            meta.insert(NEXT_ENTRY_ID, next)?;
            entries
        };
        txn.commit()?;
        Ok(entries)
    }

    /// Replace the caller-controlled fields of an existing entry.
    ///
    /// `last_updated` moves to `now`, or one second past its previous value
    /// if the clock has not advanced.
    pub fn update(&self, id: u64, draft: EntryDraft, now: u64) -> Result<Entry> {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut table = txn.open_table(ENTRIES)?;
            let previous: Entry = match table.get(id)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => {
                    return Err(Error::NotFound {
                        kind: "entry",
                        name: id.to_string(),
                    });
                }
            };

            let stamp = next_timestamp(previous.last_updated, now);
            let entry = Entry::from_draft(id, stamp, draft);
            let bytes = serde_json::to_vec(&entry)?;
            table.insert(id, bytes.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    pub fn get(&self, id: u64) -> Result<Option<Entry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load several entries in a single read transaction.
    ///
    /// Preserves the order of `ids`; ids with no stored entry are skipped.
    pub fn get_many(&self, ids: &[u64]) -> Result<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;

        let mut entries = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(guard) = table.get(id)? {
                entries.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(entries)
    }

    pub fn remove(&self, id: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(ENTRIES)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Return every stored entry ordered by id.
    pub fn list(&self) -> Result<Vec<Entry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut result = Vec::new();
        for item in table.iter()? {
            let (_id, bytes) = item?;
            result.push(serde_json::from_slice(bytes.value())?);
        }
        Ok(result)
    }

    pub fn count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        Ok(table.len()?)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

impl std::fmt::Debug for EntryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryDb").finish_non_exhaustive()
    }
}

fn next_timestamp(previous: u64, now: u64) -> u64 {
    now.max(previous.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, EntryDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = EntryDb::open(&tmp.path().join("entries.redb")).unwrap();
        (tmp, db)
    }

    fn draft(title: &str) -> EntryDraft {
        EntryDraft::new(title, "question", "answer", 1)
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let (_tmp, db) = test_db();

        let a = db.insert(draft("a"), 100).unwrap();
        let b = db.insert(draft("b"), 100).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(db.count().unwrap(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_remove() {
        let (_tmp, db) = test_db();

        let a = db.insert(draft("a"), 100).unwrap();
        assert!(db.remove(a.id).unwrap());
        assert!(!db.remove(a.id).unwrap());

        let b = db.insert(draft("b"), 100).unwrap();
        assert_eq!(b.id, 2);
    }

    #[test]
    fn batch_insert_continues_counter() {
        let (_tmp, db) = test_db();

        db.insert(draft("first"), 1).unwrap();
        let batch = db
            .batch_insert(vec![draft("x"), draft("y"), draft("z")], 1)
            .unwrap();
        let ids: Vec<u64> = batch.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        let next = db.insert(draft("after"), 1).unwrap();
        assert_eq!(next.id, 5);
    }

    #[test]
    fn update_advances_last_updated() {
        let (_tmp, db) = test_db();

        let entry = db.insert(draft("a"), 500).unwrap();
        assert_eq!(entry.last_updated, 500);

        // Clock did not move: still strictly increases.
        let updated = db.update(entry.id, draft("b"), 500).unwrap();
        assert_eq!(updated.last_updated, 501);
        assert_eq!(updated.title, "b");
        assert_eq!(updated.id, entry.id);

        let later = db.update(entry.id, draft("c"), 900).unwrap();
        assert_eq!(later.last_updated, 900);
        assert_eq!(db.get(entry.id).unwrap().unwrap(), later);
    }

    #[test]
    fn update_missing_entry_is_not_found() {
        let (_tmp, db) = test_db();
        let err = db.update(42, draft("x"), 1).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "entry", .. }));
    }

    #[test]
    fn get_many_preserves_order_and_skips_missing() {
        let (_tmp, db) = test_db();

        db.batch_insert(vec![draft("one"), draft("two"), draft("three")], 1)
            .unwrap();

        let entries = db.get_many(&[3, 99, 1]).unwrap();
        let titles: Vec<&str> =
            entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["three", "one"]);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let (_tmp, db) = test_db();

        db.batch_insert(vec![draft("one"), draft("two")], 1).unwrap();
        let ids: Vec<u64> = db.list().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("model_name").unwrap(), None);
        assert_eq!(
            db.get_setting_or("model_name", "default-model").unwrap(),
            "default-model"
        );

        db.set_setting("model_name", "custom-model").unwrap();
        assert_eq!(
            db.get_setting("model_name").unwrap(),
            Some("custom-model".to_string())
        );

        assert!(db.remove_setting("model_name").unwrap());
        assert!(!db.remove_setting("model_name").unwrap());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("entries.redb");

        {
            let db = EntryDb::open(&path).unwrap();
            db.insert(draft("persisted"), 1).unwrap();
        }

        {
            let db = EntryDb::open(&path).unwrap();
            let entry = db.get(1).unwrap().unwrap();
            assert_eq!(entry.title, "persisted");
            assert_eq!(db.insert(draft("next"), 1).unwrap().id, 2);
        }
    }
}
