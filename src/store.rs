//! Audit store — the explicitly constructed owner of all audit state
//!
//! `AuditStore` ties a transport channel, the ingestion core, the view
//! state, the selection set, and settings persistence together. It is
//! single-owner: every mutation goes through `&mut self`, so no locks are
//! needed. Inbound messages are processed one at a time, either by
//! `drain()` (everything queued, synchronously) or `next_message().await`.

use crate::config::AuditConfig;
use crate::error::Result;
use crate::ingest::{EventLog, IngestOutcome};
use crate::query::{self, ExportDocument, Selection, ViewState};
use crate::state::{load_settings, load_snapshot, save_settings, KeyValueStore};
use crate::transport::{open_with_fallback, Channel, Subscription, Transport};
use crate::types::{
    BusMessage, ConnectionStatus, EventEntry, Settings, SortDirection, SortField, TypeFilter,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One derived page of the filtered, sorted log
#[derive(Debug, Clone, PartialEq)]
pub struct View<'a> {
    /// Entries on the current page, in sorted order
    pub items: Vec<&'a EventEntry>,
    /// Current page after clamping (1-indexed)
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Number of entries passing the filter
    pub total: usize,
}

/// The audit feed's state owner
pub struct AuditStore {
    config: AuditConfig,
    log: EventLog,
    view: ViewState,
    selection: Selection,
    storage: Option<Arc<dyn KeyValueStore>>,
    channel: Option<Box<dyn Channel>>,
    subscription: Option<Box<dyn Subscription>>,
    status: ConnectionStatus,
}

impl AuditStore {
    /// Create a store over an already-open channel and optional storage
    ///
    /// Settings are restored from storage (defaults on missing/corrupt
    /// data) and the users snapshot, if any, seeds the log before any bus
    /// message is processed. Without a channel the store is disconnected
    /// but fully operable.
    pub fn create(
        channel: Option<Box<dyn Channel>>,
        storage: Option<Arc<dyn KeyValueStore>>,
        config: AuditConfig,
    ) -> Self {
        let defaults = Settings {
            paused: false,
            limit: config.default_limit,
        };
        let settings = storage
            .as_deref()
            .map(|s| load_settings(s, &config.settings_key, defaults))
            .unwrap_or(defaults);

        let mut log = EventLog::with_config(settings, &config);
        if let Some(storage) = storage.as_deref() {
            let records = load_snapshot(storage, &config.snapshot_key);
            if !records.is_empty() {
                log.load_snapshot(&records);
            }
        }

        let subscription = channel.as_ref().map(|c| c.subscribe());
        let status = match &channel {
            Some(c) => ConnectionStatus::Connected(c.kind()),
            None => ConnectionStatus::Disconnected,
        };

        tracing::info!(
            status = ?status,
            paused = settings.paused,
            limit = settings.limit,
            entries = log.len(),
            "Audit store created"
        );

        Self {
            view: ViewState::new(config.default_page_size),
            config,
            log,
            selection: Selection::new(),
            storage,
            channel,
            subscription,
            status,
        }
    }

    /// Open the primary transport (or the fallback) and create a store
    ///
    /// Failure to open either transport leaves the store disconnected.
    pub fn connect(
        primary: &dyn Transport,
        fallback: &dyn Transport,
        storage: Option<Arc<dyn KeyValueStore>>,
        config: AuditConfig,
    ) -> Self {
        let channel = match open_with_fallback(primary, fallback) {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!(error = %e, "No transport available, running disconnected");
                None
            }
        };
        Self::create(channel, storage, config)
    }

    /// Ingest a message as if it arrived over the bus
    pub fn ingest(&mut self, message: BusMessage) -> IngestOutcome {
        let outcome = self.log.ingest(message);
        if outcome == IngestOutcome::Appended {
            self.clamp_page();
        }
        outcome
    }

    /// Process every message already queued on the subscription
    ///
    /// Returns the number of messages processed.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Some(message) = self.subscription.as_mut().and_then(|s| s.try_next()) {
            self.ingest(message);
            processed += 1;
        }
        processed
    }

    /// Wait for the next bus message and ingest it
    ///
    /// Returns `None` once the subscription has ended or when disconnected.
    pub async fn next_message(&mut self) -> Option<IngestOutcome> {
        let message = self.subscription.as_mut()?.next().await?;
        Some(self.ingest(message))
    }

    /// Publish a message to the other contexts on the bus (best-effort)
    pub fn publish(&self, message: BusMessage) {
        match &self.channel {
            Some(channel) => channel.publish(message),
            None => tracing::debug!("Publish while disconnected ignored"),
        }
    }

    /// Pause or resume ingestion; resuming flushes the pending buffer
    pub fn set_paused(&mut self, paused: bool) {
        self.log.set_paused(paused);
        self.clamp_page();
        self.persist_settings();
    }

    pub fn toggle_paused(&mut self) {
        self.set_paused(!self.log.is_paused());
    }

    /// Change the live log limit
    pub fn set_limit(&mut self, limit: usize) {
        self.log.set_limit(limit);
        self.clamp_page();
        self.persist_settings();
    }

    /// Empty the log, pending buffer, seen-set, and selection
    pub fn clear(&mut self) {
        self.log.clear();
        self.selection.clear();
        self.clamp_page();
        tracing::info!("Audit log cleared");
    }

    pub fn toggle_pin(&mut self, id: &str) -> bool {
        self.log.toggle_pin(id)
    }

    pub fn toggle_select(&mut self, id: &str) -> bool {
        self.selection.toggle(id)
    }

    /// Select or deselect every entry on the current page
    pub fn select_all_on_page(&mut self, checked: bool) {
        let page_ids: Vec<String> = self
            .view()
            .items
            .iter()
            .map(|e| e.id.clone())
            .collect();
        self.selection
            .select_all(page_ids.iter().map(String::as_str), checked);
    }

    /// Whether the header checkbox of the current page is checked
    pub fn page_all_selected(&self) -> bool {
        let view = self.view();
        self.selection
            .all_selected(view.items.iter().map(|e| e.id.as_str()))
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Delete the selected entries from the live log
    ///
    /// Returns the number removed; the selection is cleared.
    pub fn delete_selected(&mut self) -> usize {
        let removed = self.log.remove(self.selection.ids());
        self.selection.clear();
        self.clamp_page();
        tracing::debug!(removed, "Selected entries deleted");
        removed
    }

    /// Export the visible selection, or the whole filtered view when none of
    /// the selected entries is visible
    pub fn export(&self) -> Result<ExportDocument> {
        query::export(&self.sorted(), &self.selection)
    }

    pub fn set_type_filter(&mut self, type_filter: impl Into<TypeFilter>) {
        self.view.filter.type_filter = type_filter.into();
        self.clamp_page();
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.view.filter.query = query.into();
        self.clamp_page();
    }

    /// Click a sort column; every click flips the direction
    pub fn sort_by(&mut self, field: SortField) {
        self.view.sort_by(field);
    }

    pub fn set_sort(&mut self, field: SortField, direction: SortDirection) {
        self.view.sort_field = field;
        self.view.sort_direction = direction;
    }

    pub fn set_page(&mut self, page: usize) {
        self.view.set_page(page);
        self.clamp_page();
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.view.set_page_size(page_size);
    }

    /// Live log, newest first
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &EventEntry> + '_ {
        self.log.entries()
    }

    /// Filtered and sorted entries
    pub fn sorted(&self) -> Vec<&EventEntry> {
        self.view.apply(self.log.entries())
    }

    /// The current page of the filtered, sorted log
    pub fn view(&self) -> View<'_> {
        let sorted = self.sorted();
        let page = query::paginate(&sorted, self.view.page(), self.view.page_size());
        View {
            items: page.items.to_vec(),
            page: page.page,
            page_size: page.page_size,
            total_pages: page.total_pages,
            total: page.total,
        }
    }

    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        self.log.type_counts()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn view_state(&self) -> &ViewState {
        &self.view
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn settings(&self) -> Settings {
        self.log.settings()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Cancel the subscription and close the channel; idempotent
    pub fn dispose(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
            tracing::info!("Audit store disposed");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    fn clamp_page(&mut self) {
        let filtered = query::filter(self.log.entries(), &self.view.filter).len();
        self.view.clamp_page(filtered);
    }

    /// Fire-and-forget: a failed write never blocks ingestion
    fn persist_settings(&self) {
        let Some(storage) = self.storage.as_deref() else {
            return;
        };
        if let Err(e) = save_settings(storage, &self.config.settings_key, &self.log.settings()) {
            tracing::warn!(error = %e, "Failed to persist settings, skipping");
        }
    }
}

impl Drop for AuditStore {
    fn drop(&mut self) {
        self.dispose();
    }
}
