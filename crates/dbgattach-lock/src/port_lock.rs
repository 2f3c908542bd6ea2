//! PortLock: non-blocking, cross-process try-lock over a port number.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use dbgattach_core::{PortLockHandle, parse_port};

use crate::error::LockError;
use crate::staleness::StalenessPolicy;

/// Heartbeats closer together than this are coalesced into one write.
const HEARTBEAT_MIN_INTERVAL_MS: i64 = 1_000;

const LOCK_PREFIX: &str = "port-";
const LOCK_SUFFIX: &str = ".lock";
const HEARTBEAT_PREFIX: &str = "heartbeat-";
const HEARTBEAT_SUFFIX: &str = ".json";

/// Per-user lock directory: `<tmp>/dbgattach-<user>/locks`.
pub fn default_lock_dir(user: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("dbgattach-{user}"))
        .join("locks")
}

/// Content of a `port-<port>.lock` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockRecord {
    port: String,
    owner: String,
    acquired_at_ms: i64,
}

/// Content of a `heartbeat-<owner>.json` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HeartbeatRecord {
    owner: String,
    at_ms: i64,
}

/// State of an entry that blocked `create_new`.
enum Existing {
    Live,
    /// Carries the record that was judged; `None` for a garbled entry.
    Stale(Option<LockRecord>),
    /// Removed before it could be inspected.
    Gone,
}

/// Filesystem lock over port identifiers, shared by every instance of one user.
///
/// Each instance has a unique owner token. Lock records name their owner so
/// that `release` never removes another instance's entry, and so that the
/// staleness check can find the holder's activity heartbeat.
pub struct PortLock {
    dir: PathBuf,
    owner_token: String,
    policy: StalenessPolicy,
    held: Mutex<HashMap<String, PortLockHandle>>,
    last_heartbeat_ms: AtomicI64,
}

impl PortLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            owner_token: generate_owner_token(),
            policy: StalenessPolicy::default(),
            held: Mutex::new(HashMap::new()),
            last_heartbeat_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Lock set in the default per-user directory.
    pub fn for_user(user: &str) -> Self {
        Self::new(default_lock_dir(user))
    }

    #[must_use]
    pub fn with_owner_token(mut self, token: impl Into<String>) -> Self {
        self.owner_token = token.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    /// Locks this instance currently holds.
    pub async fn held(&self) -> Vec<PortLockHandle> {
        let held = self.held.lock().await;
        let mut handles: Vec<PortLockHandle> = held.values().cloned().collect();
        handles.sort_by(|a, b| a.port.cmp(&b.port));
        handles
    }

    // ─── Acquire ─────────────────────────────────────────────────

    /// Try to claim `port`. Never blocks on another holder.
    ///
    /// Returns `false` when the port is held by a live holder, or when any
    /// filesystem error occurs.
    pub async fn try_acquire(&self, port: &str) -> bool {
        self.try_acquire_at(port, Utc::now()).await
    }

    pub async fn try_acquire_at(&self, port: &str, now: DateTime<Utc>) -> bool {
        match self.acquire_inner(port, now).await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::debug!(port, error = %e, "lock acquisition failed");
                false
            }
        }
    }

    async fn acquire_inner(&self, port: &str, now: DateTime<Utc>) -> Result<bool, LockError> {
        parse_port(port)?;
        self.ensure_dir().await?;
        let path = self.entry_path(port);

        if self.create_entry(&path, port, now).await? {
            self.remember(port, now).await;
            return Ok(true);
        }

        match self.inspect_existing(&path, now).await? {
            Existing::Live => return Ok(false),
            Existing::Gone => {}
            Existing::Stale(judged) => {
                if !self.take_stale_entry(&path, port, judged.as_ref()).await? {
                    return Ok(false);
                }
            }
        }

        // Another contender may have created the entry in between.
        if self.create_entry(&path, port, now).await? {
            tracing::info!(port, "reclaimed stale port lock");
            self.remember(port, now).await;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Move the stale entry aside and delete it.
    ///
    /// Rename is atomic, so exactly one contender moves a given entry. The
    /// moved entry must still be the one judged stale: if another contender
    /// reclaimed it first, what we moved is its fresh entry and it goes back.
    async fn take_stale_entry(
        &self,
        path: &Path,
        port: &str,
        judged: Option<&LockRecord>,
    ) -> Result<bool, LockError> {
        let tombstone = self.tombstone_path(port);
        match tokio::fs::rename(path, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let moved = read_json::<LockRecord>(&tombstone).await;
        if moved.as_ref() != judged {
            tracing::debug!(port, "stale entry was reclaimed by another instance");
            restore_entry(&tombstone, path).await?;
            return Ok(false);
        }

        match tokio::fs::remove_file(&tombstone).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic create-if-absent. `Ok(false)` means the entry already exists.
    async fn create_entry(
        &self,
        path: &Path,
        port: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let record = LockRecord {
            port: port.to_string(),
            owner: self.owner_token.clone(),
            acquired_at_ms: now.timestamp_millis(),
        };
        let body = serde_json::to_vec(&record)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = match options.open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = write_all_synced(&mut file, &body).await {
            // Do not leave a half-written entry behind us.
            let _ = tokio::fs::remove_file(path).await;
            return Err(e.into());
        }
        Ok(true)
    }

    async fn inspect_existing(&self, path: &Path, now: DateTime<Utc>) -> Result<Existing, LockError> {
        let record = read_json::<LockRecord>(path).await;

        let acquired_ms = match &record {
            Some(r) => r.acquired_at_ms,
            // Garbled or half-written entry: fall back to its mtime.
            None => match tokio::fs::metadata(path).await {
                Ok(meta) => DateTime::<Utc>::from(meta.modified()?).timestamp_millis(),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Existing::Gone),
                Err(e) => return Err(e.into()),
            },
        };

        if record.as_ref().is_some_and(|r| r.owner == self.owner_token) {
            // Already ours; not re-entrant.
            return Ok(Existing::Live);
        }

        let heartbeat_ms = match &record {
            Some(r) => self.heartbeat_of(&r.owner).await,
            None => self.latest_foreign_heartbeat().await,
        };

        let now_ms = now.timestamp_millis();
        let lock_age = age_ms(now_ms, acquired_ms);
        let heartbeat_age = heartbeat_ms.map(|at| age_ms(now_ms, at));
        let stale = self.policy.is_stale(lock_age, heartbeat_age);

        tracing::debug!(
            path = %path.display(),
            lock_age_ms = lock_age,
            heartbeat_age_ms = ?heartbeat_age,
            stale,
            "evaluated existing port lock"
        );
        Ok(if stale {
            Existing::Stale(record)
        } else {
            Existing::Live
        })
    }

    async fn heartbeat_of(&self, owner: &str) -> Option<i64> {
        read_json::<HeartbeatRecord>(&self.heartbeat_path(owner))
            .await
            .map(|hb| hb.at_ms)
    }

    /// Most recent heartbeat of any other instance in the directory.
    async fn latest_foreign_heartbeat(&self) -> Option<i64> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        let own = heartbeat_file_name(&self.owner_token);
        let mut latest: Option<i64> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(HEARTBEAT_PREFIX)
                || !name.ends_with(HEARTBEAT_SUFFIX)
                || *name == own
            {
                continue;
            }
            if let Some(hb) = read_json::<HeartbeatRecord>(&entry.path()).await {
                latest = Some(latest.map_or(hb.at_ms, |cur| cur.max(hb.at_ms)));
            }
        }
        latest
    }

    async fn remember(&self, port: &str, now: DateTime<Utc>) {
        let handle = PortLockHandle {
            port: port.to_string(),
            owner_token: self.owner_token.clone(),
            acquired_at: now,
        };
        self.held.lock().await.insert(port.to_string(), handle);
    }

    // ─── Release ─────────────────────────────────────────────────

    /// Remove this instance's entry for `port`.
    ///
    /// Missing entries and entries owned by another instance (e.g. reclaimed
    /// as stale) are left alone.
    pub async fn release(&self, port: &str) {
        self.held.lock().await.remove(port);
        if parse_port(port).is_err() {
            return;
        }
        let path = self.entry_path(port);
        match read_json::<LockRecord>(&path).await {
            Some(record) if record.owner == self.owner_token => {
                if let Err(e) = tokio::fs::remove_file(&path).await
                    && e.kind() != ErrorKind::NotFound
                {
                    tracing::debug!(port, error = %e, "lock release failed");
                }
            }
            Some(record) => {
                tracing::debug!(port, owner = %record.owner, "lock now owned by another instance");
            }
            None => {}
        }
    }

    // ─── Activity ────────────────────────────────────────────────

    /// Record that the user interacted with this instance.
    pub async fn mark_user_activity(&self) {
        self.mark_user_activity_at(Utc::now()).await;
    }

    pub async fn mark_user_activity_at(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        if last != i64::MIN && (now_ms - last).abs() < HEARTBEAT_MIN_INTERVAL_MS {
            return;
        }
        self.last_heartbeat_ms.store(now_ms, Ordering::Relaxed);

        if let Err(e) = self.write_heartbeat(now_ms).await {
            tracing::debug!(error = %e, "heartbeat write failed");
        }
    }

    async fn write_heartbeat(&self, now_ms: i64) -> Result<(), LockError> {
        self.ensure_dir().await?;
        let record = HeartbeatRecord {
            owner: self.owner_token.clone(),
            at_ms: now_ms,
        };
        let body = serde_json::to_vec(&record)?;
        // Write-then-rename so readers never observe a torn heartbeat.
        let final_path = self.heartbeat_path(&self.owner_token);
        let tmp_path = final_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    // ─── Shutdown ────────────────────────────────────────────────

    /// Release every lock this instance holds and drop its heartbeat.
    pub async fn cleanup(&self) {
        let ports: Vec<String> = self.held.lock().await.keys().cloned().collect();
        for port in &ports {
            self.release(port).await;
        }
        match tokio::fs::remove_file(self.heartbeat_path(&self.owner_token)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(error = %e, "heartbeat removal failed"),
        }
        if !ports.is_empty() {
            tracing::info!(count = ports.len(), "released held port locks");
        }
    }

    // ─── Paths ───────────────────────────────────────────────────

    fn entry_path(&self, port: &str) -> PathBuf {
        self.dir.join(format!("{LOCK_PREFIX}{port}{LOCK_SUFFIX}"))
    }

    /// Private to this instance, so concurrent reclaimers never share one.
    fn tombstone_path(&self, port: &str) -> PathBuf {
        self.dir.join(format!(
            "{LOCK_PREFIX}{port}{LOCK_SUFFIX}.reclaim-{}",
            self.owner_token
        ))
    }

    fn heartbeat_path(&self, owner: &str) -> PathBuf {
        self.dir.join(heartbeat_file_name(owner))
    }

    /// Create the directory (mode 0700) and refuse one owned by another user.
    async fn ensure_dir(&self) -> Result<(), LockError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};

            let meta = tokio::fs::metadata(&self.dir).await?;
            let uid = current_uid();
            if meta.uid() != uid {
                return Err(LockError::ForeignDirectory {
                    path: self.dir.clone(),
                    owner: meta.uid(),
                });
            }
            if meta.permissions().mode() & 0o777 != 0o700 {
                tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Put a moved entry back without overwriting one created since.
async fn restore_entry(tombstone: &Path, path: &Path) -> Result<(), LockError> {
    match tokio::fs::hard_link(tombstone, path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::debug!(path = %path.display(), "entry recreated before restore");
        }
        Err(_) => tokio::fs::rename(tombstone, path).await?,
    }
    match tokio::fs::remove_file(tombstone).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn heartbeat_file_name(owner: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{owner}{HEARTBEAT_SUFFIX}")
}

fn age_ms(now_ms: i64, then_ms: i64) -> u64 {
    u64::try_from(now_ms.saturating_sub(then_ms)).unwrap_or(0)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn write_all_synced(file: &mut tokio::fs::File, body: &[u8]) -> std::io::Result<()> {
    file.write_all(body).await?;
    file.sync_all().await
}

/// `<pid>-<nanos>`: unique per instance, stable for its lifetime.
fn generate_owner_token() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    )
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid() has no arguments, no side effects, and cannot fail.
    unsafe extern "C" {
        safe fn getuid() -> u32;
    }
    getuid()
}
