//! The scheduler: sole owner of every download record.
//!
//! Runs as one task. Commands arrive from [`DownloadManager`] handles, and
//! transfer units, planners and merges report back over a channel; nothing
//! else touches records, the wait queue or the active set.
//!
//! [`DownloadManager`]: crate::download::DownloadManager

use crate::config::{DownloadSettings, DEFAULT_CATEGORY};
use crate::download::manager::{ControlAction, DownloadStats, NewDownload};
use crate::download::merge;
use crate::download::planner::{self, ByteRange, SegmentPlan};
use crate::download::progress::{SegmentTotals, SpeedSampler};
use crate::download::task::{
    run_transfer, ControlSignal, TransferControl, TransferEvent, TransferRequest,
};
use crate::download::{extract_filename, DownloadSnapshot, EngineEvent};
use crate::error::{DownloadError, Result};
use crate::store::{DownloadId, DownloadRecord, DownloadStatus, DownloadStore};
use reqwest::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Failed attempts a download may have before it ends in Error
pub const MAX_RETRIES: u32 = 3;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests from manager handles
pub(crate) enum Command {
    Add(NewDownload, Reply<DownloadSnapshot>),
    Control(DownloadId, ControlAction, Reply<()>),
    Remove(DownloadId, Reply<Removed>),
    ClearCompleted(Reply<usize>),
    List(Reply<Vec<DownloadSnapshot>>),
    Get(DownloadId, Reply<DownloadSnapshot>),
    Stats(Reply<DownloadStats>),
    UpdateConfig(DownloadSettings, Reply<()>),
    Save(Reply<()>),
    Shutdown(Reply<Pending>),
}

/// Tasks of downloads that left the active set but may still be running
#[derive(Default)]
pub(crate) struct Pending {
    /// Stopped transfer units; they end at the next chunk boundary
    pub transfers: Vec<JoinHandle<()>>,
    /// Merges cannot be interrupted and still write the destination
    pub merges: Vec<JoinHandle<()>>,
}

impl Pending {
    fn absorb(&mut self, other: Pending) {
        self.transfers.extend(other.transfers);
        self.merges.extend(other.merges);
    }
}

/// A record taken out of the model, with the tasks that still need reaping
pub(crate) struct Removed {
    pub record: DownloadRecord,
    pub pending: Pending,
}

/// Identifies one transfer unit; segment 0 is used for single-stream downloads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct UnitId {
    pub record: DownloadId,
    pub segment: usize,
}

/// Reports from workers, tagged with the attempt they belong to
pub(crate) enum WorkerMsg {
    Transfer {
        unit: UnitId,
        attempt: u64,
        event: TransferEvent,
    },
    Planned {
        id: DownloadId,
        attempt: u64,
        result: Result<SegmentPlan>,
    },
    Merged {
        id: DownloadId,
        attempt: u64,
        result: Result<u64>,
    },
}

struct SegmentHandle {
    control: TransferControl,
    task: JoinHandle<()>,
    range: Option<ByteRange>,
    finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planning,
    Transferring,
    Merging,
}

/// Runtime state of a download that holds a concurrency slot
struct ActiveDownload {
    attempt: u64,
    phase: Phase,
    paused: bool,
    split: bool,
    segments: BTreeMap<usize, SegmentHandle>,
    merge: Option<JoinHandle<()>>,
    totals: SegmentTotals,
    sampler: SpeedSampler,
}

impl ActiveDownload {
    fn new(attempt: u64, downloaded: u64) -> Self {
        Self {
            attempt,
            phase: Phase::Transferring,
            paused: false,
            split: false,
            segments: BTreeMap::new(),
            merge: None,
            totals: SegmentTotals::default(),
            sampler: SpeedSampler::new(Instant::now(), downloaded),
        }
    }

    fn signal(&self) -> ControlSignal {
        if self.paused {
            ControlSignal::Pause
        } else {
            ControlSignal::Run
        }
    }

    /// Stop every unit and hand back whatever is still running
    fn stop_all(self) -> Pending {
        let transfers = self
            .segments
            .into_values()
            .map(|segment| {
                segment.control.stop();
                segment.task
            })
            .collect();
        Pending {
            transfers,
            merges: self.merge.into_iter().collect(),
        }
    }
}

pub(crate) struct Scheduler {
    settings: DownloadSettings,
    client: Client,
    store: Option<DownloadStore>,
    /// All records in creation order
    records: Vec<DownloadRecord>,
    queue: VecDeque<DownloadId>,
    active: HashMap<DownloadId, ActiveDownload>,
    next_attempt: u64,
    events: broadcast::Sender<EngineEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerMsg>,
    worker_rx: mpsc::UnboundedReceiver<WorkerMsg>,
}

impl Scheduler {
    pub(crate) fn new(
        settings: DownloadSettings,
        store: Option<DownloadStore>,
        records: Vec<DownloadRecord>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Result<Self> {
        let client = build_client(&settings)?;
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        // everything unfinished goes back in line, in file order
        let queue = records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect();

        Ok(Self {
            settings,
            client,
            store,
            records,
            queue,
            active: HashMap::new(),
            next_attempt: 0,
            events,
            worker_tx,
            worker_rx,
        })
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(
            "Scheduler started with {} downloads ({} queued)",
            self.records.len(),
            self.queue.len()
        );
        self.admit();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        let _ = reply.send(Ok(self.shutdown()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        // every handle dropped without an explicit shutdown
                        drop(self.shutdown());
                        break;
                    }
                },
                Some(msg) = self.worker_rx.recv() => self.handle_worker(msg),
            }
        }

        info!("Scheduler stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Add(new, reply) => {
                let _ = reply.send(self.add(new));
            }
            Command::Control(id, action, reply) => {
                let _ = reply.send(self.control(&id, action));
            }
            Command::Remove(id, reply) => {
                let _ = reply.send(self.remove(&id));
            }
            Command::ClearCompleted(reply) => {
                let _ = reply.send(Ok(self.clear_completed()));
            }
            Command::List(reply) => {
                let list = self.records.iter().map(|r| self.snapshot(r)).collect();
                let _ = reply.send(Ok(list));
            }
            Command::Get(id, reply) => {
                let result = self
                    .record(&id)
                    .map(|r| self.snapshot(r))
                    .ok_or_else(|| DownloadError::NotFound(id.clone()));
                let _ = reply.send(result);
            }
            Command::Stats(reply) => {
                let _ = reply.send(Ok(self.stats()));
            }
            Command::UpdateConfig(settings, reply) => {
                let _ = reply.send(self.update_config(settings));
            }
            Command::Save(reply) => {
                let _ = reply.send(self.save());
            }
            Command::Shutdown(_) => unreachable!("handled in run loop"),
        }
    }

    fn handle_worker(&mut self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Transfer {
                unit,
                attempt,
                event,
            } => self.on_transfer_event(unit, attempt, event),
            WorkerMsg::Planned {
                id,
                attempt,
                result,
            } => self.on_planned(id, attempt, result),
            WorkerMsg::Merged {
                id,
                attempt,
                result,
            } => self.on_merged(id, attempt, result),
        }
    }

    // ============ Commands ============

    fn add(&mut self, new: NewDownload) -> Result<DownloadSnapshot> {
        let destination = self.resolve_destination(&new);
        if self.records.iter().any(|r| r.destination == destination) {
            return Err(DownloadError::DestinationInUse(destination));
        }

        let category = if new.category.trim().is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            new.category
        };

        let mut record = DownloadRecord::new(new.url, destination, category, new.split_count);
        record.headers = new.headers;
        info!("Added download {}: {} -> {:?}", record.id, record.url, record.destination);

        let id = record.id.clone();
        self.records.push(record);
        self.queue.push_back(id.clone());

        self.admit();
        self.emit(EngineEvent::ModelChanged);

        let record = self
            .record(&id)
            .ok_or_else(|| DownloadError::NotFound(id.clone()))?;
        Ok(self.snapshot(record))
    }

    /// A directory (or nothing) as destination means "put it in there under
    /// the name the URL suggests"
    fn resolve_destination(&self, new: &NewDownload) -> std::path::PathBuf {
        let dir = if new.destination.as_os_str().is_empty() {
            Some(self.settings.default_destination.clone())
        } else if new.destination.is_dir() {
            Some(new.destination.clone())
        } else {
            None
        };

        match dir {
            Some(dir) => dir.join(extract_filename(&new.url)),
            None => new.destination.clone(),
        }
    }

    fn control(&mut self, id: &DownloadId, action: ControlAction) -> Result<()> {
        let status = self
            .record(id)
            .map(|r| r.status)
            .ok_or_else(|| DownloadError::NotFound(id.clone()))?;
        let phase = self.active.get(id).map(|a| a.phase);
        let is_active = phase.is_some();
        debug!("Control {:?} on {} ({})", action, id, status);

        match (action, status) {
            (ControlAction::Pause, DownloadStatus::Paused)
            | (ControlAction::Resume, DownloadStatus::Downloading)
            | (ControlAction::Stop, DownloadStatus::Stopped) => Ok(()),

            // every byte is on disk already, nothing left to pause
            (ControlAction::Pause, DownloadStatus::Downloading)
                if phase == Some(Phase::Merging) =>
            {
                Ok(())
            }

            (ControlAction::Pause, DownloadStatus::Downloading) => {
                if let Some(active) = self.active.get_mut(id) {
                    active.paused = true;
                    for segment in active.segments.values() {
                        segment.control.pause();
                    }
                }
                self.set_status(id, DownloadStatus::Paused);
                Ok(())
            }

            (ControlAction::Resume, DownloadStatus::Paused) if is_active => {
                if let Some(active) = self.active.get_mut(id) {
                    active.paused = false;
                    for segment in active.segments.values() {
                        segment.control.resume();
                    }
                    active.sampler = SpeedSampler::new(Instant::now(), active.totals.total());
                }
                self.set_status(id, DownloadStatus::Downloading);
                Ok(())
            }

            // restored after a restart and still waiting for a slot
            (ControlAction::Resume, DownloadStatus::Paused) => {
                self.set_status(id, DownloadStatus::Queued);
                if !self.queue.contains(id) {
                    self.queue.push_back(id.clone());
                }
                self.admit();
                Ok(())
            }

            (
                ControlAction::Stop,
                DownloadStatus::Downloading | DownloadStatus::Paused | DownloadStatus::Queued,
            ) => {
                if let Some(active) = self.active.remove(id) {
                    drop(active.stop_all());
                }
                self.queue.retain(|queued| queued != id);
                self.set_status(id, DownloadStatus::Stopped);
                info!("Stopped download {}", id);
                self.admit();
                Ok(())
            }

            (ControlAction::Retry, DownloadStatus::Error | DownloadStatus::Stopped) => {
                if let Some(record) = self.record_mut(id) {
                    record.retries = 0;
                    record.error_message = None;
                }
                self.set_status(id, DownloadStatus::Queued);
                self.queue.push_front(id.clone());
                self.admit();
                Ok(())
            }

            (action, status) => Err(DownloadError::InvalidTransition {
                action: action.as_str(),
                status,
            }),
        }
    }

    fn remove(&mut self, id: &DownloadId) -> Result<Removed> {
        let index = self
            .records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| DownloadError::NotFound(id.clone()))?;

        let pending = self
            .active
            .remove(id)
            .map(ActiveDownload::stop_all)
            .unwrap_or_default();
        self.queue.retain(|queued| queued != id);
        let record = self.records.remove(index);
        info!("Removed download {} ({})", id, record.filename);

        self.admit();
        self.emit(EngineEvent::ModelChanged);
        Ok(Removed { record, pending })
    }

    fn clear_completed(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.status.is_terminal());
        let cleared = before - self.records.len();
        if cleared > 0 {
            info!("Cleared {} finished downloads, kept {}", cleared, self.records.len());
            self.emit(EngineEvent::ModelChanged);
        }
        cleared
    }

    fn stats(&self) -> DownloadStats {
        DownloadStats {
            active: self.active.len(),
            queued: self.queue.len(),
            max_concurrent: self.settings.concurrency_limit(),
        }
    }

    fn update_config(&mut self, settings: DownloadSettings) -> Result<()> {
        self.client = build_client(&settings)?;
        info!(
            "Config updated: {} concurrent, {} KiB/s",
            settings.concurrency_limit(),
            settings.speed_limit_kbps
        );
        self.settings = settings;
        self.admit();
        Ok(())
    }

    fn save(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.save(&self.records),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) -> Pending {
        let mut pending = Pending::default();
        for (_, active) in self.active.drain() {
            pending.absorb(active.stop_all());
        }

        if let Err(e) = self.save() {
            error!("Failed to save downloads on shutdown: {}", e);
        }
        pending
    }

    // ============ Admission ============

    fn admit(&mut self) {
        while self.active.len() < self.settings.concurrency_limit() {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            // entries can go stale when a record is stopped or removed
            let waiting = matches!(
                self.record(&id).map(|r| r.status),
                Some(DownloadStatus::Queued | DownloadStatus::Paused)
            );
            if !waiting || self.active.contains_key(&id) {
                continue;
            }
            self.start(id);
        }
    }

    fn start(&mut self, id: DownloadId) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;

        let Some(record) = self.record_mut(&id) else {
            return;
        };
        record.status = DownloadStatus::Downloading;
        record.error_message = None;
        let split_count = record.split_count;
        let url = record.url.clone();
        let headers = record.headers.clone();
        let downloaded = record.downloaded_size;
        info!("Starting download {} (attempt {}, {} parts)", id, attempt, split_count);

        let mut active = ActiveDownload::new(attempt, downloaded);
        if split_count > 1 {
            active.phase = Phase::Planning;
            let client = self.client.clone();
            let tx = self.worker_tx.clone();
            let plan_id = id.clone();
            // the HEAD request must not block this loop
            tokio::spawn(async move {
                let result = planner::plan(&client, &url, &headers, split_count).await;
                let _ = tx.send(WorkerMsg::Planned {
                    id: plan_id,
                    attempt,
                    result,
                });
            });
            self.active.insert(id.clone(), active);
        } else {
            self.active.insert(id.clone(), active);
            self.start_single(&id);
        }

        self.publish(&id);
    }

    fn start_single(&mut self, id: &DownloadId) {
        let Some(record) = self.record(id) else {
            return;
        };
        let request = self.transfer_request(record, record.destination.clone(), None, 1);
        let handle = self.spawn_unit(id, 0, None, request);
        if let Some(active) = self.active.get_mut(id) {
            active.split = false;
            active.phase = Phase::Transferring;
            active.segments.insert(0, handle);
        }
    }

    fn start_segments(&mut self, id: &DownloadId, ranges: &[ByteRange]) {
        let Some(record) = self.record(id) else {
            return;
        };
        let requests: Vec<TransferRequest> = ranges
            .iter()
            .enumerate()
            .map(|(index, range)| {
                self.transfer_request(record, record.part_path(index), Some(*range), ranges.len())
            })
            .collect();

        let handles: Vec<(usize, SegmentHandle)> = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| (index, self.spawn_unit(id, index, request.range, request)))
            .collect();

        if let Some(active) = self.active.get_mut(id) {
            active.split = true;
            active.phase = Phase::Transferring;
            active.segments.extend(handles);
        }
    }

    fn transfer_request(
        &self,
        record: &DownloadRecord,
        path: std::path::PathBuf,
        range: Option<ByteRange>,
        units: usize,
    ) -> TransferRequest {
        // the cap applies per download, shared evenly by its segments
        let rate_limit = self
            .settings
            .speed_limit_bytes()
            .map(|limit| (limit / units.max(1) as u64).max(1));

        TransferRequest {
            url: record.url.clone(),
            path,
            range,
            rate_limit,
            headers: record.headers.clone(),
            read_timeout: Duration::from_secs(self.settings.read_timeout_secs.max(1)),
        }
    }

    fn spawn_unit(
        &self,
        id: &DownloadId,
        segment: usize,
        range: Option<ByteRange>,
        request: TransferRequest,
    ) -> SegmentHandle {
        let initial = self
            .active
            .get(id)
            .map(ActiveDownload::signal)
            .unwrap_or(ControlSignal::Run);
        let attempt = self.active.get(id).map(|a| a.attempt).unwrap_or_default();
        let (control, rx) = TransferControl::new(initial);

        let client = self.client.clone();
        let tx = self.worker_tx.clone();
        let unit = UnitId {
            record: id.clone(),
            segment,
        };
        let task = tokio::spawn(async move {
            run_transfer(&client, request, rx, |event| {
                let _ = tx.send(WorkerMsg::Transfer {
                    unit: unit.clone(),
                    attempt,
                    event,
                });
            })
            .await;
        });

        SegmentHandle {
            control,
            task,
            range,
            finished: false,
        }
    }

    // ============ Worker events ============

    fn is_current(&self, id: &DownloadId, attempt: u64) -> bool {
        self.active.get(id).is_some_and(|a| a.attempt == attempt)
    }

    fn on_transfer_event(&mut self, unit: UnitId, attempt: u64, event: TransferEvent) {
        let id = unit.record.clone();
        if !self.is_current(&id, attempt) {
            debug!("Dropping stale event from {:?} attempt {}", unit, attempt);
            return;
        }

        match event {
            TransferEvent::Started {
                total,
                resumed_from,
            } => {
                let split = self.active.get(&id).is_some_and(|a| a.split);
                if !split && total > 0 {
                    if let Some(record) = self.record_mut(&id) {
                        record.total_size = total;
                    }
                }
                self.report_bytes(&unit, resumed_from);
            }
            TransferEvent::Progress(bytes) => self.report_bytes(&unit, bytes),
            TransferEvent::Finished { total } => self.on_unit_finished(&unit, total),
            TransferEvent::Failed(e) => {
                let split = self.active.get(&id).is_some_and(|a| a.split);
                if split {
                    warn!("Segment {} of {} failed: {}", unit.segment, id, e);
                }
                self.fail(&id, e);
            }
            TransferEvent::Stopped => {
                debug!("Unit {:?} stopped without a stop request", unit);
            }
        }
    }

    fn report_bytes(&mut self, unit: &UnitId, bytes: u64) {
        let Some(active) = self.active.get_mut(&unit.record) else {
            return;
        };
        let downloaded = active.totals.report(unit.segment, bytes);
        active.sampler.sample(Instant::now(), downloaded);

        if let Some(record) = self.record_mut(&unit.record) {
            record.set_downloaded(downloaded);
        }
        self.publish(&unit.record);
    }

    fn on_unit_finished(&mut self, unit: &UnitId, total: u64) {
        let id = &unit.record;
        let Some(active) = self.active.get_mut(id) else {
            return;
        };

        if !active.split {
            active.totals.report(unit.segment, total);
            if let Some(record) = self.record_mut(id) {
                if total > 0 {
                    record.total_size = total;
                }
                record.set_downloaded(total);
            }
            self.complete(id);
            return;
        }

        if let Some(segment) = active.segments.get_mut(&unit.segment) {
            segment.finished = true;
            let len = segment.range.map(|r| r.len()).unwrap_or(total);
            active.totals.report(unit.segment, len);
        }
        let downloaded = active.totals.total();
        let all_finished = active.segments.values().all(|s| s.finished);
        let parts = active.segments.len();
        let attempt = active.attempt;

        if let Some(record) = self.record_mut(id) {
            record.set_downloaded(downloaded);
        }
        self.publish(id);

        if all_finished {
            if let Some(active) = self.active.get_mut(id) {
                active.phase = Phase::Merging;
            }
            let Some(destination) = self.record(id).map(|r| r.destination.clone()) else {
                return;
            };
            let tx = self.worker_tx.clone();
            let merge_id = id.clone();
            let handle = tokio::spawn(async move {
                let result = merge::merge(destination, parts).await;
                let _ = tx.send(WorkerMsg::Merged {
                    id: merge_id,
                    attempt,
                    result,
                });
            });
            if let Some(active) = self.active.get_mut(id) {
                active.merge = Some(handle);
            }
        }
    }

    fn on_planned(&mut self, id: DownloadId, attempt: u64, result: Result<SegmentPlan>) {
        if !self.is_current(&id, attempt) {
            debug!("Dropping stale plan for {}", id);
            return;
        }

        match result {
            Ok(plan) if plan.supports_split && plan.ranges.len() > 1 => {
                if let Some(record) = self.record_mut(&id) {
                    record.total_size = plan.total_size;
                    record.split_count = plan.ranges.len();
                }
                info!("Downloading {} in {} parts", id, plan.ranges.len());
                self.start_segments(&id, &plan.ranges);
                self.publish(&id);
            }
            Ok(plan) => {
                info!("Falling back to a single stream for {}", id);
                if let Some(record) = self.record_mut(&id) {
                    record.split_count = 1;
                    if plan.total_size > 0 {
                        record.total_size = plan.total_size;
                    }
                }
                self.start_single(&id);
                self.publish(&id);
            }
            Err(e) => self.fail(&id, e),
        }
    }

    fn on_merged(&mut self, id: DownloadId, attempt: u64, result: Result<u64>) {
        if !self.is_current(&id, attempt) {
            debug!("Dropping stale merge result for {}", id);
            return;
        }

        match result {
            Ok(size) => {
                if let Some(record) = self.record_mut(&id) {
                    record.set_downloaded(size);
                }
                self.complete(&id);
            }
            Err(e) => self.fail(&id, e),
        }
    }

    // ============ Outcomes ============

    fn complete(&mut self, id: &DownloadId) {
        self.active.remove(id);
        let Some(record) = self.record_mut(id) else {
            return;
        };
        record.status = DownloadStatus::Finished;
        record.error_message = None;
        if record.total_size == 0 {
            record.total_size = record.downloaded_size;
        }
        let filename = record.filename.clone();
        info!("Download finished: {} ({} bytes)", filename, record.downloaded_size);

        self.publish(id);
        self.emit(EngineEvent::DownloadCompleted {
            id: id.clone(),
            filename,
        });
        self.emit(EngineEvent::ModelChanged);
        self.admit();
    }

    /// The one place where retry-vs-terminal is decided
    fn fail(&mut self, id: &DownloadId, err: DownloadError) {
        if let Some(active) = self.active.remove(id) {
            // a failed segment takes its siblings down with it
            drop(active.stop_all());
        }
        let Some(record) = self.record_mut(id) else {
            return;
        };

        let message = err.to_string();
        record.error_message = Some(message.clone());

        if err.is_retryable() && record.retries + 1 < MAX_RETRIES {
            record.retries += 1;
            record.status = DownloadStatus::Queued;
            warn!(
                "Download {} failed ({}), retry {}/{}",
                id,
                message,
                record.retries,
                MAX_RETRIES - 1
            );
            self.queue.push_front(id.clone());
        } else {
            record.status = DownloadStatus::Error;
            error!("Download {} failed: {}", id, message);
        }

        self.publish(id);
        self.emit(EngineEvent::ModelChanged);
        self.admit();
    }

    // ============ Helpers ============

    fn record(&self, id: &DownloadId) -> Option<&DownloadRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    fn record_mut(&mut self, id: &DownloadId) -> Option<&mut DownloadRecord> {
        self.records.iter_mut().find(|r| &r.id == id)
    }

    fn set_status(&mut self, id: &DownloadId, status: DownloadStatus) {
        if let Some(record) = self.record_mut(id) {
            record.status = status;
        }
        self.publish(id);
        self.emit(EngineEvent::ModelChanged);
    }

    fn snapshot(&self, record: &DownloadRecord) -> DownloadSnapshot {
        let sampler = self.active.get(&record.id).map(|a| &a.sampler);
        let speed = sampler.map(SpeedSampler::speed).unwrap_or(0.0);
        let eta = sampler.and_then(|s| s.eta(record.total_size, record.downloaded_size));
        DownloadSnapshot::new(record, speed as u64, eta)
    }

    fn publish(&self, id: &DownloadId) {
        if let Some(record) = self.record(id) {
            self.emit(EngineEvent::ItemUpdated(self.snapshot(record)));
        }
    }

    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn build_client(settings: &DownloadSettings) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)))
        .build()?)
}
