mod auction;
mod conflict;
mod error;
mod mutations;
mod queries;
mod view;

pub use error::EngineError;
pub use view::AssetView;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::Config;
use crate::fairness::FairnessScorer;
use crate::model::*;
use crate::quota::QuotaManager;
use crate::rules::Validator;
use crate::wal::Wal;

pub type SharedAssetState = Arc<RwLock<AssetState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Sole owner of the WAL. Appends that queue up while one is in flight share a
/// single fsync; compaction and counter reads run between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Lookups that span assets. Updated only by `apply_to_asset`, under the owning asset's lock.
#[derive(Default)]
pub(super) struct Indexes {
    /// Booking or bid id → asset id.
    pub(super) entity_to_asset: DashMap<Ulid, Ulid>,
    /// LOB → its live bookings on every asset.
    pub(super) lob_bookings: DashMap<String, Vec<Booking>>,
}

impl Indexes {
    fn sync_booking(&self, booking: &Booking) {
        let mut entries = self.lob_bookings.entry(booking.lob.clone()).or_default();
        entries.retain(|b| b.id != booking.id);
        if booking.is_live() {
            entries.push(booking.clone());
        }
    }

    fn forget_asset(&self, state: &AssetState) {
        for booking in &state.bookings {
            if let Some(mut entries) = self.lob_bookings.get_mut(&booking.lob) {
                entries.retain(|b| b.id != booking.id);
            }
            self.entity_to_asset.remove(&booking.id);
        }
        for bid in state.bids.values().flatten() {
            self.entity_to_asset.remove(&bid.id);
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedAssetState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) indexes: Indexes,
    /// Serializes admissions per LOB. Always taken before an asset lock.
    lob_locks: DashMap<String, Arc<Mutex<()>>>,
    pub(super) roi: DashMap<String, RoiMetrics>,
    pub(super) bid_caps: DashMap<(String, AssetLevel), BidCap>,
    pub(super) config: Arc<Config>,
    pub(super) validator: Validator,
    pub(super) quota: QuotaManager,
    pub(super) scorer: FairnessScorer,
    pub(super) clock: Arc<dyn Clock>,
    /// Shared by writes that touch no asset lock; exclusive while compacting.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event to one asset. The caller holds its write lock.
fn apply_to_asset(state: &mut AssetState, event: &Event, indexes: &Indexes) {
    match event {
        Event::AssetUpdated { asset } => {
            state.asset = asset.clone();
        }
        Event::QuotaConfigured { config, .. } => {
            state.quota = Some(*config);
        }
        Event::FairnessConfigured { config, .. } => {
            state.fairness = Some(*config);
        }
        Event::BookingAdmitted { booking } => {
            state.allocate(&booking.range, booking.allocated_class, booking.slots);
            state.insert_booking(booking.clone());
            indexes.entity_to_asset.insert(booking.id, booking.asset_id);
            indexes.sync_booking(booking);
        }
        Event::BookingRescheduled { id, range, .. } => {
            if let Some(mut booking) = state.remove_booking(*id) {
                if booking.is_live() {
                    state.release(&booking.range, booking.allocated_class, booking.slots);
                    state.allocate(range, booking.allocated_class, booking.slots);
                }
                booking.range = *range;
                indexes.sync_booking(&booking);
                state.insert_booking(booking);
            }
        }
        Event::BookingStatusChanged { id, status, .. } => {
            let Some(booking) = state.booking_mut(*id) else { return };
            let was_live = booking.is_live();
            booking.status = *status;
            let booking = booking.clone();
            if was_live && !booking.is_live() {
                state.release(&booking.range, booking.allocated_class, booking.slots);
            }
            indexes.sync_booking(&booking);
        }
        Event::AuctionStarted { booking_id, .. } => {
            if let Some(booking) = state.booking_mut(*booking_id) {
                booking.auction_status = AuctionStatus::Active;
                let booking = booking.clone();
                indexes.sync_booking(&booking);
            }
        }
        Event::BidPlaced { bid, auto_raised, .. } => {
            let bids = state.bids.entry(bid.booking_id).or_default();
            match bids.iter_mut().find(|b| b.id == bid.id) {
                Some(existing) => *existing = bid.clone(),
                None => bids.push(bid.clone()),
            }
            for (id, amount) in auto_raised {
                if let Some(raised) = bids.iter_mut().find(|b| b.id == *id) {
                    raised.amount = *amount;
                }
            }
            indexes.entity_to_asset.insert(bid.id, state.asset.id);
        }
        Event::BidCancelled { id, booking_id, .. } => {
            if let Some(bid) = state
                .bids
                .get_mut(booking_id)
                .and_then(|bids| bids.iter_mut().find(|b| b.id == *id))
            {
                bid.status = BidStatus::Cancelled;
            }
        }
        Event::AuctionEnded { booking_id, winner, lost, .. } => {
            if let Some(bids) = state.bids.get_mut(booking_id) {
                for bid in bids.iter_mut().filter(|b| lost.contains(&b.id)) {
                    bid.status = BidStatus::Lost;
                }
            }
            let Some(booking) = state.booking_mut(*booking_id) else { return };
            match winner {
                Some(win) => {
                    let previous = booking.allocated_class;
                    booking.auction_status = AuctionStatus::Completed;
                    booking.winning_bid = Some(win.bid_id);
                    booking.allocated_class = win.class;
                    let booking = booking.clone();
                    if booking.is_live() {
                        state.release(&booking.range, previous, booking.slots);
                        state.allocate(&booking.range, win.class, booking.slots);
                    }
                    state.last_wins.insert(win.lob.clone(), win.on);
                    indexes.sync_booking(&booking);
                }
                None => {
                    booking.auction_status = AuctionStatus::Cancelled;
                    let booking = booking.clone();
                    indexes.sync_booking(&booking);
                }
            }
        }
        // Handled at the DashMap level or engine-wide, not here
        Event::AssetRegistered { .. }
        | Event::AssetRestored { .. }
        | Event::BidCapSet { .. }
        | Event::RoiRecorded { .. } => {}
    }
}

/// Rebuild one asset from a compaction snapshot.
fn restore_asset(event: &Event, indexes: &Indexes) -> Option<AssetState> {
    let Event::AssetRestored { asset, quota, fairness, bookings, bids, last_wins } = event else {
        return None;
    };
    let mut state = AssetState::new(asset.clone());
    state.quota = *quota;
    state.fairness = *fairness;
    for booking in bookings {
        if booking.is_live() {
            state.allocate(&booking.range, booking.allocated_class, booking.slots);
        }
        state.insert_booking(booking.clone());
        indexes.entity_to_asset.insert(booking.id, asset.id);
        indexes.sync_booking(booking);
    }
    for bid in bids {
        state.bids.entry(bid.booking_id).or_default().push(bid.clone());
        indexes.entity_to_asset.insert(bid.id, asset.id);
    }
    state.last_wins = last_wins.iter().cloned().collect();
    Some(state)
}

impl Engine {
    pub fn new(wal_path: PathBuf, config: Arc<Config>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            indexes: Indexes::default(),
            lob_locks: DashMap::new(),
            roi: DashMap::new(),
            bid_caps: DashMap::new(),
            validator: Validator::from_config(&config.rules, &config.quota),
            quota: QuotaManager::new(config.quota.clone(), config.business_hours),
            scorer: FairnessScorer::new(config.fairness.clone()),
            config,
            clock,
            compaction_gate: RwLock::new(()),
        };

        // Replay: we are the sole owner of these Arcs, so try_write always succeeds.
        // Never block here; this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        metrics::gauge!(crate::observability::ASSETS_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            events = events.len(),
            assets = engine.state.len(),
            "replayed WAL from {}",
            wal_path.display()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::AssetRegistered { asset } => {
                let state = AssetState::new(asset.clone());
                self.state.insert(asset.id, Arc::new(RwLock::new(state)));
            }
            Event::AssetRestored { asset, .. } => {
                if let Some(previous) = self.get_asset(&asset.id)
                    && let Ok(guard) = previous.try_read()
                {
                    self.indexes.forget_asset(&guard);
                }
                if let Some(state) = restore_asset(event, &self.indexes) {
                    self.state.insert(asset.id, Arc::new(RwLock::new(state)));
                }
            }
            Event::BidCapSet { lob, level, cap } => {
                self.bid_caps.insert((lob.clone(), *level), *cap);
            }
            Event::RoiRecorded { lob, metrics } => {
                self.merge_roi(lob, metrics);
            }
            other => {
                if let Some(asset_id) = event_asset_id(other)
                    && let Some(entry) = self.state.get(&asset_id)
                {
                    let arc = entry.clone();
                    drop(entry);
                    if let Ok(mut guard) = arc.try_write() {
                        apply_to_asset(&mut guard, other, &self.indexes);
                    }
                }
            }
        }
    }

    pub(super) fn merge_roi(&self, lob: &str, metrics: &RoiMetrics) {
        let mut entry = self.roi.entry(lob.to_string()).or_default();
        for (name, value) in metrics {
            entry.insert(name.clone(), *value);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_asset(&self, id: &Ulid) -> Option<SharedAssetState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_asset_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.indexes.entity_to_asset.get(entity_id).map(|e| *e.value())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut AssetState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_asset(state, event, &self.indexes);
        Ok(())
    }

    /// Lookup entity → asset, get asset, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<AssetState>, EngineError> {
        let asset_id = self
            .get_asset_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        Ok(state.write_owned().await)
    }

    /// Same as `resolve_entity_write`, read side.
    pub(super) async fn resolve_entity_read(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<AssetState>, EngineError> {
        let asset_id = self
            .get_asset_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let state = self
            .get_asset(&asset_id)
            .ok_or(EngineError::NotFound(asset_id))?;
        Ok(state.read_owned().await)
    }

    pub(super) fn lob_lock(&self, lob: &str) -> Arc<Mutex<()>> {
        self.lob_locks.entry(lob.to_string()).or_default().clone()
    }
}

/// The owning asset of an event (for events applied inside one asset).
fn event_asset_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AssetUpdated { asset } => Some(asset.id),
        Event::QuotaConfigured { asset_id, .. }
        | Event::FairnessConfigured { asset_id, .. }
        | Event::BookingRescheduled { asset_id, .. }
        | Event::BookingStatusChanged { asset_id, .. }
        | Event::AuctionStarted { asset_id, .. }
        | Event::BidPlaced { asset_id, .. }
        | Event::BidCancelled { asset_id, .. }
        | Event::AuctionEnded { asset_id, .. } => Some(*asset_id),
        Event::BookingAdmitted { booking } => Some(booking.asset_id),
        Event::AssetRegistered { .. }
        | Event::AssetRestored { .. }
        | Event::BidCapSet { .. }
        | Event::RoiRecorded { .. } => None,
    }
}
