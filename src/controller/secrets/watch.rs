//! # Secret Watch Provider
//!
//! Long-lived, refcounted watches on individual Secrets.
//!
//! There is one underlying watch per secret identity (namespace and name),
//! shared by every caller that references any key of that secret. A watch is
//! opened on the first `add` and torn down when the last reference is removed.
//! Handles read the cached value at call time, never a snapshot taken when
//! the handle was created.
//!
//! When a watch stream closes without being cancelled the cached value is
//! dropped and the watch is reopened after `base + uniform(0, jitter)`, so
//! reconnects after a shared outage spread out instead of hitting the API
//! server together. Every (re)open starts with a relist, which reports a
//! secret deleted while the watch was down.
//!
//! The registry lock only guards the identity map. Refcounts and cached
//! values live behind a lock on each record, and tearing a watch down never
//! holds the registry lock.

use super::{secret_payload, SecretSource, SourceKind};
use crate::observability::metrics;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use kube_runtime::watcher;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SecretWatchError {
    #[error("secret {namespace}/{name} has no value for key '{key}'")]
    NotFound {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("only secrets can be watched, got {0}")]
    NotASecret(SourceKind),

    #[error("secret {0} is not being watched")]
    NotWatched(SecretIdentity),
}

/// Namespace and name of a watched secret
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretIdentity {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for SecretIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&SecretSource> for SecretIdentity {
    fn from(source: &SecretSource) -> Self {
        Self {
            namespace: source.namespace.clone(),
            name: source.name.clone(),
        }
    }
}

/// Events delivered by a secret watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretEvent {
    /// The secret was created or changed
    Applied(BTreeMap<String, Vec<u8>>),
    /// The secret was deleted
    Deleted,
}

/// Opens a watch stream for a single secret. The stream ending means the
/// watch closed.
#[async_trait]
pub trait SecretWatchSource: Send + Sync + 'static {
    async fn watch(
        &self,
        identity: &SecretIdentity,
    ) -> Result<BoxStream<'static, SecretEvent>, SecretWatchError>;
}

/// Turns watcher events for one secret into [`SecretEvent`]s
///
/// A relist that finishes without returning the secret means it was deleted
/// while no watch was running, which a plain watch would never report.
#[derive(Debug, Default)]
struct RelistTracker {
    relisting: bool,
    seen: bool,
}

impl RelistTracker {
    fn on_event(&mut self, event: watcher::Event<Secret>) -> Option<SecretEvent> {
        match event {
            watcher::Event::Init => {
                self.relisting = true;
                self.seen = false;
                None
            }
            watcher::Event::InitApply(secret) => {
                self.seen = true;
                Some(SecretEvent::Applied(secret_payload(&secret)))
            }
            watcher::Event::InitDone => {
                let missing = self.relisting && !self.seen;
                self.relisting = false;
                missing.then_some(SecretEvent::Deleted)
            }
            watcher::Event::Apply(secret) => Some(SecretEvent::Applied(secret_payload(&secret))),
            watcher::Event::Delete(_) => Some(SecretEvent::Deleted),
        }
    }
}

/// [`SecretWatchSource`] backed by a `kube_runtime` watcher on one secret name
///
/// The stream ends at the first watcher error so the provider's jittered
/// reopen applies instead of the watcher retrying on its own.
#[derive(Clone)]
pub struct KubeSecretWatchSource {
    client: Client,
}

impl fmt::Debug for KubeSecretWatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSecretWatchSource").finish_non_exhaustive()
    }
}

impl KubeSecretWatchSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretWatchSource for KubeSecretWatchSource {
    async fn watch(
        &self,
        identity: &SecretIdentity,
    ) -> Result<BoxStream<'static, SecretEvent>, SecretWatchError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &identity.namespace);
        let config =
            watcher::Config::default().fields(&format!("metadata.name={}", identity.name));
        let identity = identity.clone();
        let mut tracker = RelistTracker::default();

        Ok(watcher(api, config)
            .take_while(move |event| {
                if let Err(e) = event {
                    warn!("Watch on secret {} failed: {}", identity, e);
                }
                futures::future::ready(event.is_ok())
            })
            .filter_map(move |event| {
                futures::future::ready(event.ok().and_then(|event| tracker.on_event(event)))
            })
            .boxed())
    }
}

/// Reopen delay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_SECRET_WATCH_RETRY_BASE_SECS, DEFAULT_SECRET_WATCH_RETRY_JITTER_SECS,
        };
        Self {
            base: Duration::from_secs(DEFAULT_SECRET_WATCH_RETRY_BASE_SECS),
            jitter: Duration::from_secs(DEFAULT_SECRET_WATCH_RETRY_JITTER_SECS),
        }
    }
}

impl RetryPolicy {
    /// `base + uniform(0, jitter)`
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.base + Duration::from_millis(extra)
    }
}

/// Callback invoked whenever a watched secret changes
pub type ChangeNotifier = Arc<dyn Fn(&SecretIdentity) + Send + Sync>;

#[derive(Debug, Default)]
struct WatcherState {
    refcount: usize,
    /// Set when the last reference is dropped; a closed record is never reused
    closed: bool,
    value: Option<BTreeMap<String, Vec<u8>>>,
}

/// Subscription record for one secret identity
struct SecretWatcher {
    identity: SecretIdentity,
    state: Mutex<WatcherState>,
    cancel: CancellationToken,
}

impl SecretWatcher {
    fn state(&self) -> std::sync::MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_value(&self, value: Option<BTreeMap<String, Vec<u8>>>) {
        self.state().value = value;
    }

    fn read_key(&self, key: &str) -> Option<Vec<u8>> {
        self.state()
            .value
            .as_ref()
            .and_then(|value| value.get(key).cloned())
    }

    /// Take a reference unless the record is already closed
    fn acquire(&self) -> bool {
        let mut state = self.state();
        if state.closed {
            return false;
        }
        state.refcount += 1;
        true
    }

    /// Drop a reference. `None` when the record was already closed, otherwise
    /// whether this was the last reference.
    fn release(&self) -> Option<bool> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        state.refcount = state.refcount.saturating_sub(1);
        state.closed = state.refcount == 0;
        Some(state.closed)
    }
}

/// Lazily resolving read handle for one key of a watched secret
#[derive(Clone)]
pub struct SecretHandle {
    watcher: Arc<SecretWatcher>,
    key: String,
}

impl fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretHandle")
            .field("secret", &self.watcher.identity)
            .field("key", &self.key)
            .finish()
    }
}

impl SecretHandle {
    /// Current value of the key
    ///
    /// # Errors
    ///
    /// Returns [`SecretWatchError::NotFound`] when the watch has not synced
    /// yet, the secret was deleted or the key is absent.
    pub fn get(&self) -> Result<Vec<u8>, SecretWatchError> {
        self.watcher
            .read_key(&self.key)
            .ok_or_else(|| SecretWatchError::NotFound {
                namespace: self.watcher.identity.namespace.clone(),
                name: self.watcher.identity.name.clone(),
                key: self.key.clone(),
            })
    }

    #[must_use]
    pub fn identity(&self) -> &SecretIdentity {
        &self.watcher.identity
    }
}

/// Refcounted registry of secret watches
pub struct SecretWatchProvider {
    source: Arc<dyn SecretWatchSource>,
    watchers: Mutex<HashMap<SecretIdentity, Arc<SecretWatcher>>>,
    retry: RetryPolicy,
    notify: Option<ChangeNotifier>,
    shutdown: CancellationToken,
}

impl fmt::Debug for SecretWatchProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretWatchProvider")
            .field("active_watches", &self.active_watches())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SecretWatchProvider {
    /// Create a provider. Every watch task is a child of `shutdown`.
    #[must_use]
    pub fn new(
        source: Arc<dyn SecretWatchSource>,
        retry: RetryPolicy,
        notify: Option<ChangeNotifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            watchers: Mutex::new(HashMap::new()),
            retry,
            notify,
            shutdown,
        }
    }

    fn watchers(&self) -> std::sync::MutexGuard<'_, HashMap<SecretIdentity, Arc<SecretWatcher>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, identity: &SecretIdentity) -> Option<Arc<SecretWatcher>> {
        self.watchers().get(identity).map(Arc::clone)
    }

    /// Subscribe to a key of a secret, opening a watch if none exists yet
    ///
    /// # Errors
    ///
    /// Only secrets can be watched.
    pub fn add(&self, source: &SecretSource) -> Result<SecretHandle, SecretWatchError> {
        if source.kind != SourceKind::Secret {
            return Err(SecretWatchError::NotASecret(source.kind));
        }
        let identity = SecretIdentity::from(source);

        let mut watchers = self.watchers();
        if let Some(existing) = watchers.get(&identity).map(Arc::clone) {
            if existing.acquire() {
                return Ok(SecretHandle {
                    watcher: existing,
                    key: source.key.clone(),
                });
            }
            // Closed by a concurrent remove that has not unregistered it yet
        }

        let watcher = Arc::new(SecretWatcher {
            identity: identity.clone(),
            state: Mutex::new(WatcherState {
                refcount: 1,
                ..WatcherState::default()
            }),
            cancel: self.shutdown.child_token(),
        });
        watchers.insert(identity.clone(), Arc::clone(&watcher));
        let active = watchers.len();
        drop(watchers);

        self.spawn_watch(Arc::clone(&watcher));
        metrics::set_active_secret_watches(active);
        info!("Opened watch on secret {}", identity);

        Ok(SecretHandle {
            watcher,
            key: source.key.clone(),
        })
    }

    /// Drop one reference, tearing the watch down when it was the last one
    ///
    /// # Errors
    ///
    /// Returns [`SecretWatchError::NotWatched`] when no watch exists for the secret.
    pub fn remove(&self, source: &SecretSource) -> Result<(), SecretWatchError> {
        let identity = SecretIdentity::from(source);
        let not_watched = || SecretWatchError::NotWatched(identity.clone());

        let watcher = self.lookup(&identity).ok_or_else(not_watched)?;
        let last = watcher.release().ok_or_else(not_watched)?;
        if !last {
            return Ok(());
        }

        watcher.cancel.cancel();
        watcher.set_value(None);

        let mut watchers = self.watchers();
        // An add may already have replaced the closed record
        if watchers
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, &watcher))
        {
            watchers.remove(&identity);
        }
        let active = watchers.len();
        drop(watchers);

        metrics::set_active_secret_watches(active);
        info!("Closed watch on secret {}", identity);
        Ok(())
    }

    /// Move a subscription from `old` to `new`.
    ///
    /// The underlying watch is reused when only the key changes.
    ///
    /// # Errors
    ///
    /// Propagates failures of the add or remove.
    pub fn update(
        &self,
        old: &SecretSource,
        new: &SecretSource,
    ) -> Result<SecretHandle, SecretWatchError> {
        // Add before remove so a shared identity never drops to zero in between
        let handle = self.add(new)?;
        self.remove(old)?;
        Ok(handle)
    }

    /// Cached value of a key, if its secret is watched and synced
    #[must_use]
    pub fn cached_value(&self, source: &SecretSource) -> Option<Vec<u8>> {
        self.lookup(&SecretIdentity::from(source))?
            .read_key(&source.key)
    }

    #[must_use]
    pub fn is_watching(&self, identity: &SecretIdentity) -> bool {
        self.lookup(identity).is_some_and(|watcher| !watcher.state().closed)
    }

    #[must_use]
    pub fn active_watches(&self) -> usize {
        self.watchers().len()
    }

    /// Number of references held on a secret
    #[must_use]
    pub fn refcount(&self, identity: &SecretIdentity) -> usize {
        self.lookup(identity)
            .map_or(0, |watcher| watcher.state().refcount)
    }

    fn spawn_watch(&self, watcher: Arc<SecretWatcher>) {
        let source = Arc::clone(&self.source);
        let retry = self.retry;
        let notify = self.notify.clone();
        tokio::spawn(run_watch(watcher, source, retry, notify));
    }
}

/// Watch loop owning its reopen schedule. Exits only on cancellation.
async fn run_watch(
    watcher: Arc<SecretWatcher>,
    source: Arc<dyn SecretWatchSource>,
    retry: RetryPolicy,
    notify: Option<ChangeNotifier>,
) {
    let identity = watcher.identity.clone();
    let cancel = watcher.cancel.clone();

    loop {
        let opened = tokio::select! {
            () = cancel.cancelled() => break,
            opened = source.watch(&identity) => opened,
        };

        match opened {
            Ok(mut stream) => loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => None,
                    event = stream.next() => event,
                };
                match event {
                    Some(SecretEvent::Applied(data)) => {
                        debug!("Secret {} changed", identity);
                        watcher.set_value(Some(data));
                        if let Some(notify) = &notify {
                            notify(&identity);
                        }
                    }
                    Some(SecretEvent::Deleted) => {
                        debug!("Secret {} deleted", identity);
                        watcher.set_value(None);
                        if let Some(notify) = &notify {
                            notify(&identity);
                        }
                    }
                    None => break,
                }
            },
            Err(e) => {
                warn!("Failed to open watch on secret {}: {}", identity, e);
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        // Changes made while the watch is down are unknown until the relist
        watcher.set_value(None);

        let delay = retry.next_delay();
        warn!(
            "Watch on secret {} closed unexpectedly, reopening in {:?}",
            identity, delay
        );
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        metrics::increment_secret_watch_reopens();
    }

    // Removed while closed or waiting: nothing to reopen, just forget the value
    watcher.set_value(None);
    debug!("Watch task for secret {} stopped", identity);
}
