use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding: {0}")]
    Snapshot(#[from] bincode::Error),
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct StoreSettings {
    pub name: String,
    /// Optional on-disk snapshotting; `None` keeps the store purely in memory.
    #[serde(default)]
    pub persistence: Option<PersistenceSettings>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { name: String::new(), persistence: None }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PersistenceSettings {
    /// Enable periodic snapshotting of this KV store to disk
    #[serde(default)]
    pub enabled: bool,
    /// Interval in milliseconds between snapshots
    #[serde(default = "PersistenceSettings::default_interval_ms")]
    pub interval_ms: u64,
}

impl PersistenceSettings {
    fn default_interval_ms() -> u64 { 5_000 }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self { enabled: true, interval_ms: Self::default_interval_ms() }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    /// Original TTL, kept so snapshots can carry it across restarts
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

type Map = BTreeMap<String, Entry>;

fn live_get<'m>(map: &'m Map, key: &str, now: Instant) -> Result<&'m str, KvError> {
    match map.get(key) {
        Some(ent) if ent.is_live(now) => Ok(ent.value.as_str()),
        _ => Err(KvError::NotFound),
    }
}

fn ascend(map: &Map, prefix: &str, now: Instant, mut visit: impl FnMut(&str, &str) -> bool) {
    let range = map.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
    for (k, ent) in range {
        if !k.starts_with(prefix) { break; }
        if !ent.is_live(now) { continue; }
        if !visit(k.as_str(), ent.value.as_str()) { break; }
    }
}

/// Read-only view handed to `KvStore::view` closures.
pub struct ReadTx<'a> {
    map: &'a Map,
    now: Instant,
}

/// Lookups shared by read and write transactions.
pub trait KvRead {
    fn get(&self, key: &str) -> Result<String, KvError>;

    /// Visit live keys starting with `prefix` in ascending key order until `visit` returns false.
    fn ascend_prefix<F: FnMut(&str, &str) -> bool>(&self, prefix: &str, visit: F);
}

impl KvRead for ReadTx<'_> {
    fn get(&self, key: &str) -> Result<String, KvError> {
        live_get(self.map, key, self.now).map(str::to_string)
    }

    fn ascend_prefix<F: FnMut(&str, &str) -> bool>(&self, prefix: &str, visit: F) {
        ascend(self.map, prefix, self.now, visit)
    }
}

/// Exclusive write transaction. Every mutation is journalled so the whole
/// transaction can be undone when the closure fails.
pub struct WriteTx<'a> {
    map: &'a mut Map,
    journal: Vec<(String, Option<Entry>)>,
    now: Instant,
}

impl KvRead for WriteTx<'_> {
    fn get(&self, key: &str) -> Result<String, KvError> {
        live_get(self.map, key, self.now).map(str::to_string)
    }

    fn ascend_prefix<F: FnMut(&str, &str) -> bool>(&self, prefix: &str, visit: F) {
        ascend(self.map, prefix, self.now, visit)
    }
}

impl WriteTx<'_> {
    /// Set a key with an optional TTL. Returns true when a live value was replaced.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> Result<bool, KvError> {
        let key = key.into();
        let entry = Entry { value: value.into(), ttl, expires_at: ttl.map(|d| self.now + d) };
        let previous = self.map.insert(key.clone(), entry);
        let replaced = previous.as_ref().map(|p| p.is_live(self.now)).unwrap_or(false);
        self.journal.push((key, previous));
        Ok(replaced)
    }

    /// Delete a key, returning its value. Expired or missing keys yield `NotFound`.
    pub fn delete(&mut self, key: &str) -> Result<String, KvError> {
        let Some(previous) = self.map.remove(key) else { return Err(KvError::NotFound); };
        let live = previous.is_live(self.now);
        let value = previous.value.clone();
        self.journal.push((key.to_string(), Some(previous)));
        if live { Ok(value) } else { Err(KvError::NotFound) }
    }

    fn rollback(self) {
        for (key, previous) in self.journal.into_iter().rev() {
            match previous {
                Some(entry) => { self.map.insert(key, entry); }
                None => { self.map.remove(&key); }
            }
        }
    }
}

/// Embedded in-memory KV store with per-key TTL, ordered prefix scans and
/// all-or-nothing write transactions. Optionally snapshotted to disk.
#[derive(Clone)]
pub struct KvStore {
    pub(crate) settings: StoreSettings,
    dir: Option<PathBuf>,
    map: Arc<RwLock<Map>>,
    /// Guard to ensure we only spawn one persistence thread
    persist_started: Arc<Mutex<bool>>,
}

impl KvStore {
    /// Purely in-memory store; nothing touches the filesystem.
    pub fn memory(name: &str) -> Self {
        let settings = StoreSettings { name: name.to_string(), persistence: None };
        Self { settings, dir: None, map: Arc::new(RwLock::new(Map::new())), persist_started: Arc::new(Mutex::new(false)) }
    }

    /// Open a store rooted at `dir`, loading the last snapshot if one exists.
    pub fn open(dir: impl Into<PathBuf>, settings: StoreSettings) -> Result<Self, KvError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let s = Self { settings, dir: Some(dir), map: Arc::new(RwLock::new(Map::new())), persist_started: Arc::new(Mutex::new(false)) };
        s.load_snapshot()?;
        s.ensure_persistence_loop();
        Ok(s)
    }

    pub fn name(&self) -> &str { &self.settings.name }

    fn snapshot_path(&self) -> Option<PathBuf> { self.dir.as_ref().map(|d| d.join("snapshot.bin")) }

    fn ensure_persistence_loop(&self) {
        let mut started = self.persist_started.lock();
        if *started { return; }
        *started = true;
        drop(started);
        let Some(persist) = self.settings.persistence.as_ref().filter(|p| p.enabled) else { return; };
        let Some(path) = self.snapshot_path() else { return; };
        let interval = Duration::from_millis(persist.interval_ms.max(1));
        let weak: Weak<RwLock<Map>> = Arc::downgrade(&self.map);
        let name = self.settings.name.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            // Stop once every handle to the store is gone
            let Some(map) = weak.upgrade() else { break; };
            let res = write_snapshot(&map.read(), &path);
            if let Err(e) = res {
                warn!(store = %name, error = %e, "kv snapshot failed");
            }
        });
    }

    /// Write the current contents to `<dir>/snapshot.bin`. No-op for memory stores.
    pub fn save_snapshot(&self) -> Result<(), KvError> {
        let Some(path) = self.snapshot_path() else { return Ok(()); };
        write_snapshot(&self.map.read(), &path)
    }

    /// Replace the in-memory contents with the snapshot on disk, if any.
    pub fn load_snapshot(&self) -> Result<(), KvError> {
        let Some(path) = self.snapshot_path() else { return Ok(()); };
        if !path.exists() { return Ok(()); }
        let bytes = std::fs::read(&path)?;
        let snap: Snapshot = bincode::deserialize(&bytes)?;
        let elapsed_ms = now_ms().saturating_sub(snap.created_ms).max(0) as u64;
        let now = Instant::now();
        let mut w = self.map.write();
        w.clear();
        let mut skipped = 0usize;
        for e in snap.entries.into_iter() {
            let ttl = e.ttl_ms.map(Duration::from_millis);
            let expires_at = match e.remaining_ms {
                Some(rem) => {
                    let left = rem.saturating_sub(elapsed_ms);
                    if left == 0 { skipped += 1; continue; }
                    Some(now + Duration::from_millis(left))
                }
                None => None,
            };
            w.insert(e.key, Entry { value: e.val, ttl, expires_at });
        }
        debug!(store = %self.settings.name, loaded = w.len(), expired = skipped, "kv snapshot loaded");
        Ok(())
    }

    /// Run `f` under a shared lock. Concurrent views never observe a half-applied update.
    pub fn view<T, E>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<T, E>) -> Result<T, E> {
        let r = self.map.read();
        let tx = ReadTx { map: &*r, now: Instant::now() };
        f(&tx)
    }

    /// Run `f` under the exclusive lock. If `f` fails every write it made is undone.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T, E>) -> Result<T, E> {
        let mut w = self.map.write();
        let mut tx = WriteTx { map: &mut *w, journal: Vec::new(), now: Instant::now() };
        match f(&mut tx) {
            Ok(v) => Ok(v),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Number of stored keys, including expired ones not yet swept.
    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Remove expired keys. Returns number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut w = self.map.write();
        let before = w.len();
        w.retain(|_, ent| ent.is_live(now));
        before - w.len()
    }
}

#[derive(Serialize, Deserialize)]
struct SnapEntry { key: String, val: String, ttl_ms: Option<u64>, remaining_ms: Option<u64> }

#[derive(Serialize, Deserialize)]
struct Snapshot { version: u32, created_ms: i64, entries: Vec<SnapEntry> }

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn write_snapshot(map: &Map, path: &Path) -> Result<(), KvError> {
    let now = Instant::now();
    let entries = map
        .iter()
        .filter(|(_, v)| v.is_live(now))
        .map(|(k, v)| SnapEntry {
            key: k.clone(),
            val: v.value.clone(),
            ttl_ms: v.ttl.map(|d| d.as_millis() as u64),
            remaining_ms: v.expires_at.map(|e| e.saturating_duration_since(now).as_millis() as u64),
        })
        .collect();
    let snap = Snapshot { version: 1, created_ms: now_ms(), entries };
    let bytes = bincode::serialize(&snap)?;
    let tmp = path.with_extension("bin.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod kv_tests;
