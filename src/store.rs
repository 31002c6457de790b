//! ContentSyncStore
//!
//! In-memory copy of the four content collections, kept consistent with the
//! hosted service by a bulk fetch plus one change subscription per table.
//! Writes go to the service first; local state only ever reflects what the
//! service confirmed.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collection::{Change, Collections};
use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::imaging::{self, ImageCodec, JPEG_CONTENT_TYPE};
use crate::models::{BlogPost, CollectionKind, Destination, ImageRef, LiveTicket, Package, Record};
use crate::remote::{
    ChangeFeed, ObjectStorage, RealtimeClient, RestClient, RowChange, RowService, StorageClient,
};
use crate::seed::live_ticket_seed;

const EVENT_CAPACITY: usize = 1024;

/// Remote collaborators of the store
#[derive(Clone)]
pub struct Services {
    pub rows: Arc<dyn RowService>,
    pub storage: Arc<dyn ObjectStorage>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl Services {
    /// HTTPS row and storage clients plus the realtime socket
    pub fn connect(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            rows: Arc::new(RestClient::new(config)?),
            storage: Arc::new(StorageClient::new(config)?),
            feed: Arc::new(RealtimeClient::new(config)?),
        })
    }
}

/// User-visible alerts for failures that must not pass silently
pub trait AlertSink: Send + Sync {
    fn alert(&self, message: &str);
}

/// Default sink: alerts go to the error log
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, message: &str) {
        error!(target: "content_sync::alert", "{message}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Loaded,
    Inserted,
    Updated,
    Deleted,
}

/// Where a local state change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Fetch,
    Write,
    Notification,
}

/// Published after every local state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub collection: CollectionKind,
    pub kind: StoreEventKind,
    pub id: Option<String>,
    pub origin: Origin,
    /// False when a notification matched nothing locally (e.g. update of an
    /// unknown id)
    pub applied: bool,
}

type ChangeStream = Pin<Box<dyn Stream<Item = (CollectionKind, RowChange)> + Send>>;

pub struct ContentSyncStore {
    services: Services,
    codec: ImageCodec,
    alerts: Arc<dyn AlertSink>,
    state: Arc<RwLock<Collections>>,
    loading: AtomicBool,
    uploading: AtomicUsize,
    last_synced: RwLock<Option<DateTime<Utc>>>,
    events: broadcast::Sender<StoreEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ContentSyncStore {
    pub fn new(services: Services) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services,
            codec: ImageCodec::default(),
            alerts: Arc::new(LogAlerts),
            state: Arc::new(RwLock::new(Collections::default())),
            loading: AtomicBool::new(true),
            uploading: AtomicUsize::new(0),
            last_synced: RwLock::new(None),
            events,
            dispatcher: Mutex::new(None),
        }
    }

    /// Store wired to the hosted service described by `config`
    pub fn connect(config: &ServiceConfig) -> Result<Self> {
        Ok(Self::new(Services::connect(config)?).with_codec(ImageCodec::from(config)))
    }

    pub fn with_codec(mut self, codec: ImageCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Initial load followed by the change subscriptions.
    pub async fn start(&self) {
        self.load().await;
        self.subscribe().await;
    }

    /// Fetch all four collections concurrently and install what arrived.
    ///
    /// Returns true when every fetch succeeded. Failed collections keep
    /// their current contents.
    pub async fn load(&self) -> bool {
        self.loading.store(true, Ordering::SeqCst);

        let (packages, blogs, destinations, tickets) = tokio::join!(
            self.fetch::<Package>(),
            self.fetch::<BlogPost>(),
            self.fetch::<Destination>(),
            self.fetch::<LiveTicket>(),
        );

        // An empty (but successful) ticket fetch shows the built-in prices.
        let tickets = tickets.map(|rows| {
            if rows.is_empty() {
                info!("no live tickets on the server, using built-in seed set");
                live_ticket_seed()
            } else {
                rows
            }
        });

        let results = [
            self.install(packages),
            self.install(blogs),
            self.install(destinations),
            self.install(tickets),
        ];
        let complete = results.iter().all(|ok| *ok);

        if complete {
            *self.last_synced.write() = Some(Utc::now());
        }
        self.loading.store(false, Ordering::SeqCst);
        complete
    }

    /// Re-run the bulk fetch without touching the subscriptions.
    pub async fn refresh(&self) -> bool {
        self.load().await
    }

    async fn fetch<T: Record>(&self) -> Result<Vec<T>> {
        let rows = self.services.rows.select_all(T::KIND.table()).await?;
        rows.into_iter().map(T::from_row).collect()
    }

    fn install<T: Record>(&self, fetched: Result<Vec<T>>) -> bool {
        match fetched {
            Ok(rows) => {
                let count = rows.len();
                T::slot_mut(&mut self.state.write()).replace_all(rows);
                info!(collection = %T::KIND, count, "collection loaded");
                self.publish(T::KIND, StoreEventKind::Loaded, None, Origin::Fetch, true);
                true
            }
            Err(e) => {
                warn!(collection = %T::KIND, error = %e, "load failed, keeping current state");
                false
            }
        }
    }

    /// Open one change subscription per collection and start the dispatcher
    /// that applies notifications in arrival order.
    pub async fn subscribe(&self) {
        let mut streams: Vec<ChangeStream> = Vec::with_capacity(CollectionKind::ALL.len());
        for kind in CollectionKind::ALL {
            match self.services.feed.subscribe(kind.table()).await {
                Ok(rx) => {
                    info!(collection = %kind, "subscribed to changes");
                    streams.push(tagged(kind, rx));
                }
                Err(e) => warn!(collection = %kind, error = %e, "subscription failed"),
            }
        }

        if streams.is_empty() {
            return;
        }

        let state = self.state.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut merged = stream::select_all(streams);
            while let Some((kind, change)) = merged.next().await {
                apply_notification(&state, &events, kind, change);
            }
            debug!("change dispatcher stopped");
        });

        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Close all subscriptions and stop the dispatcher.
    pub async fn teardown(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        for kind in CollectionKind::ALL {
            if let Err(e) = self.services.feed.unsubscribe(kind.table()).await {
                warn!(collection = %kind, error = %e, "unsubscribe failed");
            }
        }
        self.services.feed.close().await;
        info!("content store torn down");
    }

    /// Insert a new record. Any client-side id is discarded; an inline
    /// image is uploaded first and replaced by its hosted reference.
    pub async fn add<T: Record>(&self, record: T) -> Result<T> {
        let _uploading = self.begin_upload();

        match self.insert_remote(record).await {
            Ok(saved) => {
                T::slot_mut(&mut self.state.write()).prepend(saved.clone());
                self.publish(
                    T::KIND,
                    StoreEventKind::Inserted,
                    Some(saved.id()),
                    Origin::Write,
                    true,
                );
                Ok(saved)
            }
            Err(e) => Err(self.write_failed(T::KIND, "add", e)),
        }
    }

    /// Update a record by id. Only an inline image triggers an upload.
    pub async fn update<T: Record>(&self, record: T) -> Result<T> {
        let _uploading = self.begin_upload();

        match self.update_remote(record).await {
            Ok(saved) => {
                let applied = T::slot_mut(&mut self.state.write()).replace(saved.clone());
                self.publish(
                    T::KIND,
                    StoreEventKind::Updated,
                    Some(saved.id()),
                    Origin::Write,
                    applied,
                );
                Ok(saved)
            }
            Err(e) => Err(self.write_failed(T::KIND, "update", e)),
        }
    }

    pub async fn delete<T: Record>(&self, id: &str) -> Result<()> {
        match self.services.rows.delete(T::KIND.table(), id).await {
            Ok(()) => {
                let applied = T::slot_mut(&mut self.state.write()).remove(id).is_some();
                self.publish(
                    T::KIND,
                    StoreEventKind::Deleted,
                    Some(id),
                    Origin::Write,
                    applied,
                );
                Ok(())
            }
            Err(e) => Err(self.write_failed(T::KIND, "delete", e)),
        }
    }

    /// `delete` for a collection chosen at runtime
    pub async fn delete_in(&self, kind: CollectionKind, id: &str) -> Result<()> {
        match kind {
            CollectionKind::Packages => self.delete::<Package>(id).await,
            CollectionKind::Blogs => self.delete::<BlogPost>(id).await,
            CollectionKind::Destinations => self.delete::<Destination>(id).await,
            CollectionKind::LiveTickets => self.delete::<LiveTicket>(id).await,
        }
    }

    async fn insert_remote<T: Record>(&self, mut record: T) -> Result<T> {
        self.host_inline_image(&mut record).await?;

        let mut row = serde_json::to_value(&record)?;
        if let Some(fields) = row.as_object_mut() {
            fields.remove("id");
        }

        let saved = self.services.rows.insert(T::KIND.table(), row).await?;
        T::from_row(saved)
    }

    async fn update_remote<T: Record>(&self, mut record: T) -> Result<T> {
        if record.id().is_empty() {
            return Err(SyncError::NotFound {
                table: T::KIND.table().to_string(),
                id: String::new(),
            });
        }
        self.host_inline_image(&mut record).await?;

        let id = record.id().to_string();
        let row = serde_json::to_value(&record)?;
        let saved = self.services.rows.update(T::KIND.table(), &id, row).await?;
        T::from_row(saved)
    }

    /// Upload an inline image and swap in its public reference.
    async fn host_inline_image<T: Record>(&self, record: &mut T) -> Result<()> {
        let Some(ImageRef::Inline(payload)) = record.image() else {
            return Ok(());
        };

        let payload = payload.clone();
        let codec = self.codec;
        let jpeg = tokio::task::spawn_blocking(move || codec.recompress(&payload)).await??;

        let path = imaging::upload_path(T::KIND);
        let url = self
            .services
            .storage
            .upload(&path, jpeg, JPEG_CONTENT_TYPE)
            .await
            .map_err(|e| {
                if e.is_image_failure() {
                    e
                } else {
                    SyncError::upload(&path, e)
                }
            })?;

        debug!(collection = %T::KIND, %url, "inline image hosted");
        if let Some(image) = record.image_mut() {
            *image = ImageRef::Hosted(url);
        }
        Ok(())
    }

    fn write_failed(&self, kind: CollectionKind, op: &str, err: SyncError) -> SyncError {
        error!(collection = %kind, op, error = %err, "write failed, local state unchanged");
        if kind.alerts_on_write_failure() {
            self.alerts.alert(&format!("Failed to {op} live ticket: {err}"));
        }
        err
    }

    fn begin_upload(&self) -> UploadGuard<'_> {
        self.uploading.fetch_add(1, Ordering::SeqCst);
        UploadGuard(&self.uploading)
    }

    fn publish(
        &self,
        collection: CollectionKind,
        kind: StoreEventKind,
        id: Option<&str>,
        origin: Origin,
        applied: bool,
    ) {
        let _ = self.events.send(StoreEvent {
            collection,
            kind,
            id: id.map(str::to_string),
            origin,
            applied,
        });
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// True while any add/update is uploading or writing
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst) > 0
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        *self.last_synced.read()
    }

    /// Current contents of one collection, newest first
    pub fn snapshot<T: Record>(&self) -> Vec<T> {
        T::slot(&self.state.read()).as_slice().to_vec()
    }

    pub fn get<T: Record>(&self, id: &str) -> Option<T> {
        T::slot(&self.state.read()).get(id).cloned()
    }

    pub fn collections(&self) -> Collections {
        self.state.read().clone()
    }

    pub fn packages(&self) -> Vec<Package> {
        self.snapshot()
    }

    pub fn blogs(&self) -> Vec<BlogPost> {
        self.snapshot()
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.snapshot()
    }

    pub fn live_tickets(&self) -> Vec<LiveTicket> {
        self.snapshot()
    }
}

impl Drop for ContentSyncStore {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

struct UploadGuard<'a>(&'a AtomicUsize);

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn tagged(kind: CollectionKind, rx: mpsc::Receiver<RowChange>) -> ChangeStream {
    Box::pin(stream::unfold(rx, move |mut rx| async move {
        rx.recv().await.map(|change| ((kind, change), rx))
    }))
}

fn apply_notification(
    state: &RwLock<Collections>,
    events: &broadcast::Sender<StoreEvent>,
    collection: CollectionKind,
    change: RowChange,
) {
    let outcome = match collection {
        CollectionKind::Packages => apply_row::<Package>(state, change),
        CollectionKind::Blogs => apply_row::<BlogPost>(state, change),
        CollectionKind::Destinations => apply_row::<Destination>(state, change),
        CollectionKind::LiveTickets => apply_row::<LiveTicket>(state, change),
    };

    match outcome {
        Ok((kind, id, applied)) => {
            debug!(%collection, ?kind, %id, applied, "change applied");
            let _ = events.send(StoreEvent {
                collection,
                kind,
                id: Some(id),
                origin: Origin::Notification,
                applied,
            });
        }
        Err(e) => warn!(%collection, error = %e, "ignoring malformed change notification"),
    }
}

fn apply_row<T: Record>(
    state: &RwLock<Collections>,
    change: RowChange,
) -> Result<(StoreEventKind, String, bool)> {
    let change = match change {
        RowChange::Insert(row) => Change::Insert(T::from_row(row)?),
        RowChange::Update(row) => Change::Update(T::from_row(row)?),
        RowChange::Delete { id } => Change::Delete(id),
    };

    let (kind, id) = match &change {
        Change::Insert(record) => (StoreEventKind::Inserted, record.id().to_string()),
        Change::Update(record) => (StoreEventKind::Updated, record.id().to_string()),
        Change::Delete(id) => (StoreEventKind::Deleted, id.clone()),
    };

    let applied = T::slot_mut(&mut state.write()).apply(change);
    Ok((kind, id, applied))
}
