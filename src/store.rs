//! The entry store consumed by the search pipeline, and the bundled
//! implementation backed by redb and tantivy.

use std::{
    path::Path,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    entry::{Entry, EntryDraft},
    entry_db::EntryDb,
    error::{Error, Result},
    tantivy_index::{SearchIndex, WRITER_MEMORY_BUDGET},
};

/// Read access to knowledge-base entries.
///
/// `Ok(vec![])` from [`full_text_search`](EntryStore::full_text_search) means
/// the query ran and nothing matched; any failure to run it is an `Err`.
pub trait EntryStore: Send + Sync {
    /// Entries containing `phrase` as an exact phrase, in the store's own
    /// ranking order, at most `limit` of them.
    fn full_text_search(&self, phrase: &str, limit: usize) -> Result<Vec<Entry>>;

    /// Every entry in the store.
    fn fetch_all(&self) -> Result<Vec<Entry>>;
}

/// Entry store combining the record database with the phrase index.
///
/// Every mutation takes the index writer before touching the database, so a
/// busy index leaves both sides unchanged. The index can always be
/// regenerated from the database with [`KnowledgeBase::rebuild_index`].
pub struct KnowledgeBase {
    db: EntryDb,
    index: SearchIndex,
    write_lock: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(db: EntryDb, index: SearchIndex) -> Self {
        Self {
            db,
            index,
            write_lock: Mutex::new(()),
        }
    }

    /// Open the database file and index directory, creating them if needed.
    pub fn open(db_path: &Path, index_dir: &Path) -> Result<Self> {
        Ok(Self::new(EntryDb::open(db_path)?, SearchIndex::open(index_dir)?))
    }

    pub fn db(&self) -> &EntryDb {
        &self.db
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    pub fn get(&self, id: u64) -> Result<Option<Entry>> {
        self.db.get(id)
    }

    pub fn count(&self) -> Result<u64> {
        self.db.count()
    }

    /// Create an entry and make it searchable.
    pub fn add(&self, draft: EntryDraft) -> Result<Entry> {
        let _guard = self.lock_writes()?;
        let mut writer = self.index.writer(WRITER_MEMORY_BUDGET)?;
        let entry = self.db.insert(draft, unix_now())?;

        self.index.add_entry(&writer, &entry)?;
        writer.commit()?;

        tracing::debug!(id = entry.id, "entry added");
        Ok(entry)
    }

    /// Create many entries with a single database transaction and a single
    /// index commit.
    pub fn add_many(&self, drafts: Vec<EntryDraft>) -> Result<Vec<Entry>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.lock_writes()?;
        let mut writer = self.index.writer(WRITER_MEMORY_BUDGET)?;
        let entries = self.db.batch_insert(drafts, unix_now())?;

        for entry in &entries {
            self.index.add_entry(&writer, entry)?;
        }
        writer.commit()?;

        tracing::debug!(count = entries.len(), "entries added");
        Ok(entries)
    }

    /// Replace the caller-controlled fields of an entry.
    pub fn update(&self, id: u64, draft: EntryDraft) -> Result<Entry> {
        let _guard = self.lock_writes()?;
        let mut writer = self.index.writer(WRITER_MEMORY_BUDGET)?;
        let entry = self.db.update(id, draft, unix_now())?;

        self.index.add_entry(&writer, &entry)?;
        writer.commit()?;

        tracing::debug!(id, "entry updated");
        Ok(entry)
    }

    /// Delete an entry. Returns `false` if it did not exist.
    pub fn remove(&self, id: u64) -> Result<bool> {
        let _guard = self.lock_writes()?;
        let mut writer = self.index.writer(WRITER_MEMORY_BUDGET)?;
        if !self.db.remove(id)? {
            return Ok(false);
        }

        self.index.delete_entry(&writer, id)?;
        writer.commit()?;

        tracing::debug!(id, "entry removed");
        Ok(true)
    }

    /// Regenerate the phrase index from the database.
    pub fn rebuild_index(&self) -> Result<usize> {
        self.rebuild_index_with(|_, _| Ok(()))
    }

    /// Regenerate the phrase index, reporting `(done, total)` after every
    /// entry.
    pub fn rebuild_index_with(
        &self,
        mut progress: impl FnMut(usize, usize) -> Result<()>,
    ) -> Result<usize> {
        let _guard = self.lock_writes()?;
        let entries = self.db.list()?;
        let total = entries.len();
        let mut done = 0;
        let count = self.index.rebuild_with(&entries, |_| {
            done += 1;
            progress(done, total)
        })?;
        tracing::info!(count, "index rebuilt");
        Ok(count)
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Config("store write lock poisoned".to_string()))
    }
}

impl EntryStore for KnowledgeBase {
    fn full_text_search(&self, phrase: &str, limit: usize) -> Result<Vec<Entry>> {
        let hits = self.index.search_phrase(phrase, limit)?;
        let ids: Vec<u64> = hits.iter().map(|h| h.entry_id).collect();
        self.db.get_many(&ids)
    }

    fn fetch_all(&self) -> Result<Vec<Entry>> {
        self.db.list()
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase").finish_non_exhaustive()
    }
}

/// Current time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kb() -> (tempfile::TempDir, KnowledgeBase) {
        let tmp = tempfile::tempdir().unwrap();
        let db = EntryDb::open(&tmp.path().join("entries.redb")).unwrap();
        let kb = KnowledgeBase::new(db, SearchIndex::open_in_ram().unwrap());
        (tmp, kb)
    }

    fn draft(title: &str, question: &str) -> EntryDraft {
        EntryDraft::new(title, question, "See the help center.", 1)
    }

    #[test]
    fn added_entries_are_searchable() {
        let (_tmp, kb) = test_kb();

        let entry = kb.add(draft("Reset password", "Forgot it")).unwrap();
        let found = kb.full_text_search("reset password", 10).unwrap();
        assert_eq!(found, vec![entry]);
    }

    #[test]
    fn full_text_miss_is_ok_and_empty() {
        let (_tmp, kb) = test_kb();

        kb.add(draft("Reset password", "Forgot it")).unwrap();
        let found = kb.full_text_search("how do I reset my password", 10);
        assert!(found.unwrap().is_empty());
    }

    #[test]
    fn update_reindexes() {
        let (_tmp, kb) = test_kb();

        let entry = kb.add(draft("Old title", "q")).unwrap();
        let updated = kb.update(entry.id, draft("Fresh title", "q")).unwrap();
        assert!(updated.last_updated > entry.last_updated);

        assert!(kb.full_text_search("old title", 10).unwrap().is_empty());
        let found = kb.full_text_search("fresh title", 10).unwrap();
        assert_eq!(found, vec![updated]);
    }

    #[test]
    fn remove_drops_from_both_sides() {
        let (_tmp, kb) = test_kb();

        let entry = kb.add(draft("Invoice", "q")).unwrap();
        assert!(kb.remove(entry.id).unwrap());
        assert!(!kb.remove(entry.id).unwrap());

        assert!(kb.get(entry.id).unwrap().is_none());
        assert!(kb.full_text_search("invoice", 10).unwrap().is_empty());
        assert!(kb.fetch_all().unwrap().is_empty());
    }

    #[test]
    fn add_many_and_fetch_all() {
        let (_tmp, kb) = test_kb();

        let added = kb
            .add_many(vec![draft("one", "q"), draft("two", "q")])
            .unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(kb.fetch_all().unwrap(), added);
        assert_eq!(kb.count().unwrap(), 2);
    }

    #[test]
    fn busy_index_leaves_database_untouched() {
        let (_tmp, kb) = test_kb();
        let entry = kb.add(draft("Invoice", "q")).unwrap();

        let held = kb.index().writer(WRITER_MEMORY_BUDGET).unwrap();
        assert!(kb.add(draft("Refunds", "q")).is_err());
        assert!(kb.add_many(vec![draft("one", "q")]).is_err());
        assert!(kb.update(entry.id, draft("Renamed", "q")).is_err());
        assert!(kb.remove(entry.id).is_err());
        drop(held);

        assert_eq!(kb.fetch_all().unwrap(), vec![entry.clone()]);
        assert_eq!(kb.full_text_search("invoice", 10).unwrap(), vec![entry]);
    }

    #[test]
    fn rebuild_index_restores_search() {
        let (_tmp, kb) = test_kb();

        kb.add(draft("Invoice copy", "q")).unwrap();
        kb.index().rebuild(&[]).unwrap();
        assert!(kb.full_text_search("invoice", 10).unwrap().is_empty());

        assert_eq!(kb.rebuild_index().unwrap(), 1);
        assert_eq!(kb.full_text_search("invoice", 10).unwrap().len(), 1);
    }

    #[test]
    fn rebuild_reports_progress() {
        let (_tmp, kb) = test_kb();
        kb.add_many(vec![draft("one", "q"), draft("two", "q")]).unwrap();

        let mut seen = Vec::new();
        let count = kb
            .rebuild_index_with(|done, total| {
                seen.push((done, total));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn failing_progress_aborts_rebuild() {
        let (_tmp, kb) = test_kb();
        kb.add(draft("Invoice copy", "q")).unwrap();

        let err = kb
            .rebuild_index_with(|_, _| Err(Error::Config("stop".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(kb.full_text_search("invoice", 10).unwrap().len(), 1);
    }
}
