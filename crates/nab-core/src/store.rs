//! Durable subscription state: watched sources with their cursors, and the
//! set of chats that receive broadcasts.
//!
//! File format (JSON):
//!
//! ```json
//! {
//!   "sources": { "vk": [{"id": "1", "name": "Group", "last_post_id": 42}], "twitter": [] },
//!   "chat_ids": [100500]
//! }
//! ```
//!
//! Every effective mutation is written through to disk before the call
//! returns. Reads and read-modify-write-persist sequences share one lock.

use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, warn};

use crate::{
    domain::{ChatId, Platform, PostId, Source},
    errors::Error,
    Result,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    sources: BTreeMap<String, Vec<StoredSource>>,
    #[serde(default)]
    chat_ids: BTreeSet<ChatId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct StoredSource {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    last_post_id: Option<PostId>,
    /// Fields written by other tools are kept as-is.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl StoredSource {
    fn to_source(&self, platform: Platform) -> Source {
        Source {
            platform,
            id: self.id.clone(),
            display_name: self.name.clone(),
            cursor: self.last_post_id,
        }
    }
}

fn string_or_number<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }
    Ok(match Raw::deserialize(de)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

impl Snapshot {
    fn empty() -> Self {
        let mut snap = Self::default();
        snap.ensure_platform_keys();
        snap
    }

    fn ensure_platform_keys(&mut self) {
        for platform in Platform::ALL {
            self.sources.entry(platform.as_str().to_string()).or_default();
        }
    }

    fn list(&self, platform: Platform) -> &[StoredSource] {
        self.sources
            .get(platform.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn list_mut(&mut self, platform: Platform) -> &mut Vec<StoredSource> {
        self.sources.entry(platform.as_str().to_string()).or_default()
    }
}

pub struct SubscriptionStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl SubscriptionStore {
    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store. An unreadable or unparsable file
    /// is logged, moved aside to `<path>.corrupt`, and also yields an empty
    /// store; startup never fails because of the state file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = load_or_repair(&path);
        let sources: usize = snapshot.sources.values().map(Vec::len).sum();
        info!(
            path = %path.display(),
            sources,
            targets = snapshot.chat_ids.len(),
            "subscription store loaded"
        );
        Self {
            path,
            state: Mutex::new(snapshot),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new source with no cursor. `false` if it is already watched.
    pub fn add_source(&self, platform: Platform, id: &str, name: &str) -> bool {
        let mut snap = self.lock();
        let list = snap.list_mut(platform);
        if list.iter().any(|s| s.id == id) {
            return false;
        }
        list.push(StoredSource {
            id: id.to_string(),
            name: name.to_string(),
            last_post_id: None,
            extra: serde_json::Map::new(),
        });
        self.persist(&snap);
        true
    }

    /// `true` iff the source existed and was removed.
    pub fn remove_source(&self, platform: Platform, id: &str) -> bool {
        let mut snap = self.lock();
        let list = snap.list_mut(platform);
        let before = list.len();
        list.retain(|s| s.id != id);
        if list.len() == before {
            return false;
        }
        self.persist(&snap);
        true
    }

    /// Sources of one platform, in insertion order.
    pub fn list_sources(&self, platform: Platform) -> Vec<Source> {
        self.lock()
            .list(platform)
            .iter()
            .map(|s| s.to_source(platform))
            .collect()
    }

    /// Every known platform with its sources, in polling order.
    pub fn all_sources(&self) -> BTreeMap<Platform, Vec<Source>> {
        let snap = self.lock();
        Platform::ALL
            .into_iter()
            .map(|platform| {
                let sources = snap
                    .list(platform)
                    .iter()
                    .map(|s| s.to_source(platform))
                    .collect();
                (platform, sources)
            })
            .collect()
    }

    pub fn find_source(&self, platform: Platform, id: &str) -> Option<Source> {
        self.lock()
            .list(platform)
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.to_source(platform))
    }

    /// Overwrite a source's cursor. Returns `false` if the source is gone
    /// (e.g. removed while a poll cycle was running).
    pub fn update_cursor(&self, platform: Platform, id: &str, cursor: PostId) -> bool {
        let mut snap = self.lock();
        let Some(entry) = snap.list_mut(platform).iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if entry.last_post_id == Some(cursor) {
            return true;
        }
        entry.last_post_id = Some(cursor);
        self.persist(&snap);
        true
    }

    /// `true` if the chat was not subscribed before.
    pub fn add_target(&self, chat_id: ChatId) -> bool {
        let mut snap = self.lock();
        if !snap.chat_ids.insert(chat_id) {
            return false;
        }
        self.persist(&snap);
        true
    }

    /// `true` if the chat was subscribed.
    pub fn remove_target(&self, chat_id: ChatId) -> bool {
        let mut snap = self.lock();
        if !snap.chat_ids.remove(&chat_id) {
            return false;
        }
        self.persist(&snap);
        true
    }

    /// Subscribed chats, sorted, no duplicates.
    pub fn list_targets(&self) -> Vec<ChatId> {
        self.lock().chat_ids.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called with the lock held so writes land in mutation order.
    fn persist(&self, snap: &Snapshot) {
        if let Err(e) = save_snapshot(&self.path, snap) {
            // In-memory state stays authoritative; the change is lost only on a crash.
            warn!(path = %self.path.display(), error = %e, "failed to persist subscription state");
        }
    }
}

fn load_or_repair(path: &Path) -> Snapshot {
    match load_snapshot(path) {
        Ok(Some(snap)) => snap,
        Ok(None) => {
            info!(path = %path.display(), "no state file yet, starting empty");
            Snapshot::empty()
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "state file is corrupt, starting empty");
            let aside = sibling_with_suffix(path, ".corrupt");
            match fs::rename(path, &aside) {
                Ok(()) => warn!(moved_to = %aside.display(), "corrupt state file moved aside"),
                Err(e) => warn!(error = %e, "could not move corrupt state file aside"),
            }
            Snapshot::empty()
        }
    }
}

fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let mut snap: Snapshot = serde_json::from_str(&txt)?;

    for key in snap.sources.keys() {
        if key.parse::<Platform>().is_err() {
            warn!(platform = %key, "state file lists sources for an unknown platform; they are kept but not polled");
        }
    }
    snap.ensure_platform_keys();
    Ok(Some(snap))
}

fn save_snapshot(path: &Path, snap: &Snapshot) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::Persistence(format!("{}: {e}", dir.display())))?;
    }

    let txt = serde_json::to_string_pretty(snap)?;
    let tmp = sibling_with_suffix(path, ".tmp");
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(txt.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Persistence(format!("{}: {e}", tmp.display())));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::Persistence(format!("{}: {e}", path.display()))
    })?;
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SubscriptionStore) {
        let dir = TempDir::new().unwrap();
        let store = SubscriptionStore::open(dir.path().join("sources.json"));
        (dir, store)
    }

    #[test]
    fn add_source_is_idempotent() {
        let (_dir, store) = temp_store();
        assert!(store.add_source(Platform::Vk, "1", "One"));
        assert!(!store.add_source(Platform::Vk, "1", "One again"));
        let list = store.list_sources(Platform::Vk);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].display_name, "One");
        assert_eq!(list[0].cursor, None);
    }

    #[test]
    fn same_id_on_different_platforms_are_distinct() {
        let (_dir, store) = temp_store();
        assert!(store.add_source(Platform::Vk, "rust", "VK rust"));
        assert!(store.add_source(Platform::Twitter, "rust", "Twitter rust"));
        assert!(store.remove_source(Platform::Vk, "rust"));
        assert!(store.find_source(Platform::Twitter, "rust").is_some());
    }

    #[test]
    fn listing_keeps_insertion_order() {
        let (_dir, store) = temp_store();
        for id in ["c", "a", "b"] {
            store.add_source(Platform::Twitter, id, id);
        }
        let ids: Vec<String> = store
            .list_sources(Platform::Twitter)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let all = store.all_sources();
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), Platform::ALL.to_vec());
        assert!(all[&Platform::Vk].is_empty());
    }

    #[test]
    fn removing_a_missing_source_leaves_the_file_untouched() {
        let (_dir, store) = temp_store();
        store.add_source(Platform::Vk, "1", "One");
        let before = fs::read(store.path()).unwrap();

        assert!(!store.remove_source(Platform::Vk, "X"));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn removing_from_an_empty_store_writes_nothing() {
        let (_dir, store) = temp_store();
        assert!(!store.remove_source(Platform::Vk, "X"));
        assert!(!store.path().exists());
    }

    #[test]
    fn cursor_updates_survive_reload() {
        let (dir, store) = temp_store();
        store.add_source(Platform::Vk, "1", "One");
        assert!(store.update_cursor(Platform::Vk, "1", PostId(42)));
        assert!(!store.update_cursor(Platform::Vk, "missing", PostId(1)));

        let reloaded = SubscriptionStore::open(dir.path().join("sources.json"));
        assert_eq!(
            reloaded.find_source(Platform::Vk, "1").unwrap().cursor,
            Some(PostId(42))
        );
    }

    #[test]
    fn targets_survive_restart() {
        let (dir, store) = temp_store();
        assert!(store.add_target(ChatId(7)));
        assert!(!store.add_target(ChatId(7)));
        assert!(store.add_target(ChatId(-1001)));
        drop(store);

        let reloaded = SubscriptionStore::open(dir.path().join("sources.json"));
        assert_eq!(reloaded.list_targets(), vec![ChatId(-1001), ChatId(7)]);
        assert!(reloaded.remove_target(ChatId(7)));
        assert!(!reloaded.remove_target(ChatId(7)));
        assert_eq!(reloaded.list_targets(), vec![ChatId(-1001)]);
    }

    #[test]
    fn reads_the_legacy_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        fs::write(
            &path,
            r#"{
                "sources": {
                    "vk": [{"id": "123456", "name": "Новости", "last_post_id": 1500}],
                    "twitter": [{"id": "elonmusk", "name": "Elon", "last_post_id": null}]
                },
                "chat_ids": [111, 222, 111]
            }"#,
        )
        .unwrap();

        let store = SubscriptionStore::open(&path);
        let vk = store.list_sources(Platform::Vk);
        assert_eq!(vk[0].display_name, "Новости");
        assert_eq!(vk[0].cursor, Some(PostId(1500)));
        assert_eq!(store.list_sources(Platform::Twitter)[0].cursor, None);
        assert_eq!(store.list_targets(), vec![ChatId(111), ChatId(222)]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        fs::write(&path, r#"{"chat_ids": [5]}"#).unwrap();

        let store = SubscriptionStore::open(&path);
        assert_eq!(store.list_targets(), vec![ChatId(5)]);
        assert!(store.list_sources(Platform::Vk).is_empty());
    }

    #[test]
    fn numeric_source_ids_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        fs::write(&path, r#"{"sources": {"vk": [{"id": 42, "name": "G"}]}}"#).unwrap();

        let store = SubscriptionStore::open(&path);
        assert!(store.find_source(Platform::Vk, "42").is_some());
    }

    #[test]
    fn corrupt_file_is_moved_aside_and_store_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        fs::write(&path, "{not json").unwrap();

        let store = SubscriptionStore::open(&path);
        assert!(store.list_targets().is_empty());
        assert!(store.all_sources().values().all(Vec::is_empty));
        assert_eq!(
            fs::read_to_string(dir.path().join("sources.json.corrupt")).unwrap(),
            "{not json"
        );

        // The store stays usable.
        assert!(store.add_target(ChatId(1)));
        assert!(path.exists());
    }

    #[test]
    fn unwritable_path_keeps_state_in_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "regular file").unwrap();
        let store = SubscriptionStore::open(blocker.join("sources.json"));

        assert!(store.add_target(ChatId(7)));
        assert_eq!(store.list_targets(), vec![ChatId(7)]);
        assert!(store.add_source(Platform::Vk, "1", "Group"));
        assert!(!store.add_source(Platform::Vk, "1", "Group"));
        assert!(store.update_cursor(Platform::Vk, "1", PostId(9)));
        assert_eq!(
            store.find_source(Platform::Vk, "1").unwrap().cursor,
            Some(PostId(9))
        );
        assert_eq!(fs::read_to_string(&blocker).unwrap(), "regular file");
    }

    #[test]
    fn saves_leave_no_temp_file_behind() {
        let (dir, store) = temp_store();
        assert!(store.add_target(ChatId(1)));
        assert!(dir.path().join("sources.json").exists());
        assert!(!dir.path().join("sources.json.tmp").exists());
    }

    #[test]
    fn unknown_platforms_and_fields_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        fs::write(
            &path,
            r#"{"sources": {"mastodon": [{"id": "a", "name": "A", "last_post_id": 3}],
                            "vk": [{"id": "1", "name": "One", "last_post_id": 9, "note": "keep"}]}}"#,
        )
        .unwrap();

        let store = SubscriptionStore::open(&path);
        store.add_target(ChatId(1));

        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["sources"]["mastodon"][0]["id"], "a");
        assert_eq!(saved["sources"]["vk"][0]["note"], "keep");
        assert_eq!(saved["sources"]["vk"][0]["last_post_id"], 9);
        assert_eq!(saved["sources"]["twitter"], serde_json::json!([]));
        assert_eq!(saved["chat_ids"], serde_json::json!([1]));
    }

    #[test]
    fn concurrent_mutations_are_all_persisted() {
        let (dir, store) = temp_store();
        let store = std::sync::Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.add_target(ChatId(i));
                    store.add_source(Platform::Twitter, &format!("acc{i}"), "x");
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reloaded = SubscriptionStore::open(dir.path().join("sources.json"));
        assert_eq!(reloaded.list_targets().len(), 8);
        assert_eq!(reloaded.list_sources(Platform::Twitter).len(), 8);
    }
}
