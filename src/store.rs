//! File-backed telemetry store.
//!
//! Two kinds of target: shared JSON-array files (the visit log, the combined
//! client-data index, the media index) and per-event files named by sanitized
//! IP and timestamp. Shared arrays are append-only behind a per-file mutex and
//! every rewrite lands via a temp file renamed over the target, so concurrent
//! appends lose nothing and readers never observe partial JSON. Per-event
//! files rely on unique names and need no lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::model::{
    self, ClientSummary, MediaIndexEntry, MediaKind, ScreenInfo, StoredActivity,
    StoredClientData, VisitRecord,
};

/// One shared JSON-array file.
pub struct SharedIndex {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SharedIndex {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry: read the whole array (empty when the file is
    /// missing or corrupt), push, rewrite atomically.
    pub async fn append<T: Serialize>(&self, entry: &T) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut entries = read_json_array(&self.path).await;
        entries.push(serde_json::to_value(entry)?);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_json_atomic(&self.path, &serde_json::Value::Array(entries)).await
    }

    /// Reads every entry that parses as `T`; rows that do not are skipped.
    /// No lock is taken: replacement is atomic, so any snapshot is a valid
    /// array.
    pub async fn read<T: DeserializeOwned>(&self) -> Vec<T> {
        read_json_array(&self.path)
            .await
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "skipping unreadable index entry");
                    None
                }
            })
            .collect()
    }
}

/// Handle to the on-disk telemetry layout. Cheap to clone.
#[derive(Clone)]
pub struct TelemetryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    logs_dir: PathBuf,
    media_dir: PathBuf,
    visit_log: SharedIndex,
    client_index: SharedIndex,
    media_index: SharedIndex,
}

impl TelemetryStore {
    pub fn new(logs_dir: PathBuf, media_dir: PathBuf) -> Self {
        let visit_log = SharedIndex::new(logs_dir.join("user_activity.json"));
        let client_index = SharedIndex::new(logs_dir.join("combined_client_data.json"));
        let media_index = SharedIndex::new(media_dir.join("index").join("media_index.json"));
        Self {
            inner: Arc::new(StoreInner {
                logs_dir,
                media_dir,
                visit_log,
                client_index,
                media_index,
            }),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.inner.logs_dir
    }

    pub fn media_dir(&self) -> &Path {
        &self.inner.media_dir
    }

    pub fn visit_log(&self) -> &SharedIndex {
        &self.inner.visit_log
    }

    pub fn client_index(&self) -> &SharedIndex {
        &self.inner.client_index
    }

    pub fn media_index(&self) -> &SharedIndex {
        &self.inner.media_index
    }

    /// Persists one visit: a per-visitor file plus an entry in the shared
    /// visit log.
    pub async fn record_visit(
        &self,
        sanitized_ip: &str,
        record: &VisitRecord,
    ) -> Result<PathBuf, AppError> {
        let stamp = model::filename_stamp(&record.timestamp);
        let dir = self.inner.logs_dir.join("users");
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{sanitized_ip}-{stamp}.json"));
        write_json_atomic(&path, record).await?;
        self.inner.visit_log.append(record).await?;
        Ok(path)
    }

    /// Writes one client fingerprint payload under its IP bucket and returns
    /// the generated file name (referenced by the combined index row).
    pub async fn record_client_data(
        &self,
        sanitized_ip: &str,
        stamp: &str,
        payload: &serde_json::Value,
    ) -> Result<String, AppError> {
        let dir = self.inner.logs_dir.join("client_data").join(sanitized_ip);
        fs::create_dir_all(&dir).await?;
        let file_name = format!("{sanitized_ip}-{stamp}-client.json");
        write_json_atomic(&dir.join(&file_name), payload).await?;
        Ok(file_name)
    }

    pub async fn append_client_summary(&self, summary: &ClientSummary) -> Result<(), AppError> {
        self.inner.client_index.append(summary).await
    }

    /// Writes one activity snapshot under its IP bucket.
    pub async fn record_activity(
        &self,
        sanitized_ip: &str,
        stamp: &str,
        payload: &serde_json::Value,
    ) -> Result<String, AppError> {
        let dir = self.inner.logs_dir.join("activity_data").join(sanitized_ip);
        fs::create_dir_all(&dir).await?;
        let file_name = format!("{sanitized_ip}-{stamp}-activity.json");
        write_json_atomic(&dir.join(&file_name), payload).await?;
        Ok(file_name)
    }

    /// Stores media bytes under `{date}/{ip}/{images|videos}/` and appends the
    /// matching index entry. Generated names embed the timestamp and a random
    /// hex suffix, so no coordination is needed.
    pub async fn store_media(
        &self,
        ip_address: &str,
        kind: MediaKind,
        extension: &str,
        stamp: &str,
        bytes: &[u8],
    ) -> Result<MediaIndexEntry, AppError> {
        let sanitized_ip = model::sanitize_ip(ip_address);
        let date_folder = model::today_bucket();
        let dir = self
            .inner
            .media_dir
            .join(&date_folder)
            .join(&sanitized_ip)
            .join(kind.dir_name());
        fs::create_dir_all(&dir).await?;

        let suffix = random_suffix(match kind {
            MediaKind::Image => 4,
            MediaKind::Video => 8,
        });
        let file_name = format!("{}-{stamp}-{suffix}.{extension}", kind.as_str());
        fs::write(dir.join(&file_name), bytes).await?;

        let entry = MediaIndexEntry {
            ip_address: ip_address.to_string(),
            sanitized_ip,
            media_type: kind,
            file_name,
            date_folder,
            capture_time: model::now_iso(),
        };
        self.inner.media_index.append(&entry).await?;
        Ok(entry)
    }

    /// Resolves the on-disk path for a stored media file. Every path segment
    /// must be a plain file name; traversal attempts are rejected.
    pub fn media_path(
        &self,
        date_folder: &str,
        sanitized_ip: &str,
        kind: MediaKind,
        file_name: &str,
    ) -> Result<PathBuf, AppError> {
        for part in [date_folder, sanitized_ip, file_name] {
            if !is_safe_component(part) {
                return Err(AppError::bad_request("invalid media path"));
            }
        }
        Ok(self
            .inner
            .media_dir
            .join(date_folder)
            .join(sanitized_ip)
            .join(kind.dir_name())
            .join(file_name))
    }

    /// All per-visitor files, keyed by the sanitized IP recovered from the
    /// filename. Within one IP the order is chronological (fixed-width
    /// timestamp suffix, lexicographic sort).
    pub async fn read_visit_files(&self) -> Vec<(String, VisitRecord)> {
        let dir = self.inner.logs_dir.join("users");
        let mut names = list_file_names(&dir).await;
        names.sort();

        let mut out = Vec::new();
        for name in names {
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some((ip, _)) = model::split_visit_stem(stem) else {
                tracing::warn!(file = %name, "visit file name does not match the ip-timestamp scheme");
                continue;
            };
            if let Some(record) = read_json_file::<VisitRecord>(&dir.join(&name)).await {
                out.push((ip.to_string(), record));
            }
        }
        out
    }

    /// Every stored activity snapshot, keyed by the sanitized-IP directory it
    /// lives in.
    pub async fn read_activity_files(&self) -> Vec<(String, StoredActivity)> {
        let root = self.inner.logs_dir.join("activity_data");
        let mut out = Vec::new();
        for ip in list_dir_names(&root).await {
            let dir = root.join(&ip);
            let mut names = list_file_names(&dir).await;
            names.sort();
            for name in names {
                if !name.ends_with(".json") {
                    continue;
                }
                if let Some(snapshot) = read_json_file::<StoredActivity>(&dir.join(&name)).await {
                    out.push((ip.clone(), snapshot));
                }
            }
        }
        out
    }

    /// Newest reported screen size per sanitized IP, recovered from the
    /// client-data tree.
    pub async fn read_client_screens(&self) -> BTreeMap<String, ScreenInfo> {
        let root = self.inner.logs_dir.join("client_data");
        let mut out = BTreeMap::new();
        for ip in list_dir_names(&root).await {
            let dir = root.join(&ip);
            let mut names = list_file_names(&dir).await;
            names.sort();
            for name in names.iter().rev() {
                let Some(data) = read_json_file::<StoredClientData>(&dir.join(name)).await else {
                    continue;
                };
                if let Some(screen) = data.screen_info {
                    out.insert(ip.clone(), screen);
                    break;
                }
            }
        }
        out
    }

    pub async fn read_media_index(&self) -> Vec<MediaIndexEntry> {
        self.inner.media_index.read().await
    }
}

pub(crate) fn random_suffix(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn is_safe_component(part: &str) -> bool {
    !part.is_empty() && !part.contains(['/', '\\']) && part != "." && part != ".."
}

/// Serializes `value` pretty-printed to a temp sibling, then renames it over
/// `path`.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = temp_sibling(path);
    fs::write(&tmp, &bytes).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", random_suffix(4)));
    path.with_file_name(name)
}

/// Whole-array read for a shared index. Missing file or unparseable content
/// degrades to an empty array; the next append then starts the file over.
async fn read_json_array(path: &Path) -> Vec<serde_json::Value> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read shared index");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<serde_json::Value>>(&bytes) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "shared index is not a json array, starting empty");
            Vec::new()
        }
    }
}

async fn read_json_file<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "failed to read record file");
            }
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "skipping unreadable record file");
            None
        }
    }
}

/// File names directly under `dir`; empty when the directory is missing.
async fn list_file_names(dir: &Path) -> Vec<String> {
    list_entries(dir, false).await
}

/// Subdirectory names directly under `dir`; empty when the directory is
/// missing.
async fn list_dir_names(dir: &Path) -> Vec<String> {
    let mut names = list_entries(dir, true).await;
    names.sort();
    names
}

async fn list_entries(dir: &Path, want_dirs: bool) -> Vec<String> {
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %dir.display(), error = %err, "failed to list directory");
            }
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let is_dir = entry
            .file_type()
            .await
            .map(|ft| ft.is_dir())
            .unwrap_or(false);
        if is_dir != want_dirs {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names
}
