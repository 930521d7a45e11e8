//! Keeps one keyed collection fresh from a poll loop and a push socket.
//!
//! The poll loop is the safety net: push frames are applied as they arrive, but a
//! dead or flaky socket is never retried here. The next successful poll converges
//! the collection regardless.

use crate::api::events::PushFrame;
use crate::error::Result;
use crate::realtime::collection::{KeyedCollection, Optimistic, Reducer, Settled};
use crate::realtime::connection::{ConnectionState, PushChannel, UrlBuilder};
use crate::realtime::poller::PollSchedule;
use crate::session::TokenSource;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

#[async_trait]
pub trait SnapshotSource<T>: Send + Sync {
    async fn fetch(&self) -> Result<Vec<T>>;
}

/// What subscribers receive after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<K, E> {
    pub entries: Vec<(K, E)>,
    pub aggregate: usize,
}

pub type UpdateOf<R> = Update<<R as Reducer>::Key, <R as Reducer>::Entry>;

type Callback<R> = Arc<dyn Fn(&UpdateOf<R>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// No auth token; nothing was started.
    Guest,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Socket state tagged with the run that owns it. Writes from an earlier run are dropped.
#[derive(Debug, Clone, Copy)]
struct ConnectionSlot {
    run: u64,
    state: ConnectionState,
}

/// One thread delivers updates at a time; others only flag that the state moved.
#[derive(Debug, Default)]
struct Dispatch {
    dirty: bool,
    active: bool,
}

struct Shared<R: Reducer> {
    name: &'static str,
    collection: Mutex<KeyedCollection<R>>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback<R>)>>,
    connection: Mutex<ConnectionSlot>,
    dispatch: Mutex<Dispatch>,
}

/// Releases the dispatcher role if a callback panics.
struct ActiveDispatch<'a>(Option<&'a Mutex<Dispatch>>);

impl Drop for ActiveDispatch<'_> {
    fn drop(&mut self) {
        if let Some(d) = self.0.take() {
            lock(d).active = false;
        }
    }
}

impl<R: Reducer> Shared<R> {
    fn connection_state(&self) -> ConnectionState {
        lock(&self.connection).state
    }

    /// Starts a new run and returns its id. Connection writes from older runs are ignored.
    fn begin_run(&self, state: ConnectionState) -> u64 {
        let mut slot = lock(&self.connection);
        slot.run += 1;
        slot.state = state;
        slot.run
    }

    fn set_connection(&self, run: u64, state: ConnectionState) {
        let mut slot = lock(&self.connection);
        if slot.run != run {
            log::debug!("{} socket: dropping {:?} from finished run {}", self.name, state, run);
            return;
        }
        if slot.state != state {
            log::debug!("{} socket: {:?} -> {:?}", self.name, slot.state, state);
            slot.state = state;
        }
    }

    fn state(&self) -> UpdateOf<R> {
        let c = lock(&self.collection);
        Update { entries: c.entries(), aggregate: c.aggregate() }
    }

    /// Delivers the current state to every subscriber.
    ///
    /// Deliveries are serialized and each one reads the state afresh, so the last update a
    /// subscriber sees is never older than the collection. Callbacks run outside the
    /// collection lock and may call back into the reconciler; a nested change is delivered
    /// by the loop already running.
    fn notify(&self) {
        {
            let mut d = lock(&self.dispatch);
            d.dirty = true;
            if d.active {
                return;
            }
            d.active = true;
        }
        let mut guard = ActiveDispatch(Some(&self.dispatch));
        loop {
            {
                let mut d = lock(&self.dispatch);
                if !d.dirty {
                    d.active = false;
                    guard.0 = None;
                    return;
                }
                d.dirty = false;
            }
            let update = self.state();
            let subs: Vec<Callback<R>> = lock(&self.subscribers).iter().map(|(_, f)| f.clone()).collect();
            for f in subs {
                f(&update);
            }
        }
    }

    fn apply_snapshot(&self, records: Vec<R::Record>) {
        lock(&self.collection).apply_server_snapshot(records);
        self.notify();
    }

    fn apply_frame(&self, frame: PushFrame) -> bool {
        let changed = lock(&self.collection).apply_frame(frame);
        if changed {
            self.notify();
        }
        changed
    }
}

struct Running {
    poll: JoinHandle<()>,
    socket: Option<JoinHandle<()>>,
}

impl Running {
    fn abort(self) {
        self.poll.abort();
        if let Some(s) = self.socket {
            s.abort();
        }
    }
}

pub struct Reconciler<R: Reducer> {
    shared: Arc<Shared<R>>,
    source: Arc<dyn SnapshotSource<R::Record>>,
    channel: Arc<dyn PushChannel>,
    tokens: Arc<dyn TokenSource>,
    running: Mutex<Option<Running>>,
    last_start: Mutex<Option<(PollSchedule, UrlBuilder)>>,
    next_subscription: AtomicU64,
}

impl<R: Reducer> Reconciler<R> {
    pub fn new(
        name: &'static str,
        reducer: R,
        source: Arc<dyn SnapshotSource<R::Record>>,
        channel: Arc<dyn PushChannel>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                collection: Mutex::new(KeyedCollection::new(reducer)),
                subscribers: Mutex::new(Vec::new()),
                connection: Mutex::new(ConnectionSlot { run: 0, state: ConnectionState::Idle }),
                dispatch: Mutex::new(Dispatch::default()),
            }),
            source,
            channel,
            tokens,
            running: Mutex::new(None),
            last_start: Mutex::new(None),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Starts the poll loop and opens the push socket. Must be called inside a tokio runtime.
    ///
    /// Without a stored token this logs and returns [`StartOutcome::Guest`]; guests get
    /// neither polling nor a socket.
    pub fn start(&self, schedule: PollSchedule, url_builder: UrlBuilder) -> StartOutcome {
        let mut running = lock(&self.running);
        if running.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        *lock(&self.last_start) = Some((schedule, url_builder.clone()));

        let name = self.shared.name;
        let run = self.shared.begin_run(ConnectionState::Connecting);
        let token = match self.tokens.access_token() {
            Ok(Some(t)) => t,
            Ok(None) => {
                log::info!("{}: no auth token, staying idle (guest mode)", name);
                self.shared.set_connection(run, ConnectionState::Idle);
                return StartOutcome::Guest;
            }
            Err(e) => {
                log::warn!("{}: could not read auth token: {}", name, e);
                self.shared.set_connection(run, ConnectionState::Idle);
                return StartOutcome::Guest;
            }
        };

        let poll = tokio::spawn(poll_loop(self.shared.clone(), self.source.clone(), schedule));

        let socket = match url_builder(&token) {
            Ok(url) => Some(tokio::spawn(socket_loop(
                self.shared.clone(),
                self.channel.clone(),
                url,
                run,
            ))),
            Err(e) => {
                log::error!("{}: cannot build socket url: {}", name, e);
                self.shared.set_connection(run, ConnectionState::Error);
                None
            }
        };

        *running = Some(Running { poll, socket });
        log::debug!("{}: started, polling every {:?}", name, schedule.interval);
        StartOutcome::Started
    }

    /// Closes the socket and cancels the poll loop. Safe to call any number of times.
    pub fn stop(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.abort();
            log::debug!("{}: stopped", self.shared.name);
        }
        // An aborted socket task may still be mid-step; bumping the run silences it.
        self.shared.begin_run(ConnectionState::Idle);
    }

    /// Restart with the parameters of the last `start`, e.g. when a screen regains focus.
    pub fn refocus(&self) -> Option<StartOutcome> {
        let params = lock(&self.last_start).clone();
        let (schedule, builder) = params?;
        self.stop();
        Some(self.start(schedule, builder))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateOf<R>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.subscribers).push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = lock(&self.shared.subscribers);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub fn apply_server_snapshot(&self, records: Vec<R::Record>) {
        self.shared.apply_snapshot(records);
    }

    pub fn apply_push_event(&self, event: R::Event) -> bool {
        let changed = lock(&self.shared.collection).apply_push_event(event);
        if changed {
            self.shared.notify();
        }
        changed
    }

    pub fn apply_frame(&self, frame: PushFrame) -> bool {
        self.shared.apply_frame(frame)
    }

    /// See [`KeyedCollection::mutate_optimistic`].
    pub fn mutate_optimistic<F>(&self, key: R::Key, patch: F) -> Result<Optimistic<R::Key>>
    where
        F: Fn(Option<&R::Entry>) -> R::Entry + Send + Sync + 'static,
    {
        let ticket = lock(&self.shared.collection).mutate_optimistic(key, patch)?;
        self.shared.notify();
        Ok(ticket)
    }

    pub fn commit(&self, ticket: Optimistic<R::Key>, confirmed: Option<R::Entry>) -> Settled {
        let settled = lock(&self.shared.collection).commit(ticket, confirmed);
        if settled != Settled::Stale {
            self.shared.notify();
        }
        settled
    }

    pub fn rollback(&self, ticket: Optimistic<R::Key>) -> Settled {
        let key = ticket.key.clone();
        let settled = lock(&self.shared.collection).rollback(ticket);
        if settled == Settled::RolledBack {
            log::info!("{}: rolled back optimistic change for {:?}", self.shared.name, key);
            self.shared.notify();
        }
        settled
    }

    /// Entries and aggregate read under one lock.
    pub fn state(&self) -> UpdateOf<R> {
        self.shared.state()
    }

    pub fn entries(&self) -> Vec<(R::Key, R::Entry)> {
        lock(&self.shared.collection).entries()
    }

    pub fn get(&self, key: &R::Key) -> Option<R::Entry> {
        lock(&self.shared.collection).get(key).cloned()
    }

    pub fn aggregate(&self) -> usize {
        lock(&self.shared.collection).aggregate()
    }

    pub fn is_pending(&self, key: &R::Key) -> bool {
        lock(&self.shared.collection).is_pending(key)
    }

    pub fn with_reducer<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(lock(&self.shared.collection).reducer())
    }

    /// Fetches one snapshot immediately, outside the poll loop.
    pub async fn poll_now(&self) -> Result<()> {
        let records = self.source.fetch().await?;
        self.shared.apply_snapshot(records);
        Ok(())
    }
}

impl<R: Reducer> Drop for Reconciler<R> {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.running).take() {
            running.abort();
        }
    }
}

async fn poll_loop<R: Reducer>(
    shared: Arc<Shared<R>>,
    source: Arc<dyn SnapshotSource<R::Record>>,
    schedule: PollSchedule,
) {
    let mut failures: u32 = 0;
    loop {
        match source.fetch().await {
            Ok(records) => {
                failures = 0;
                shared.apply_snapshot(records);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if e.is_auth() {
                    log::warn!("{}: poll rejected, session expired: {}", shared.name, e);
                } else {
                    log::warn!("{}: poll failed ({} in a row): {}", shared.name, failures, e);
                }
            }
        }
        tokio::time::sleep(schedule.next_delay(failures)).await;
    }
}

async fn socket_loop<R: Reducer>(
    shared: Arc<Shared<R>>,
    channel: Arc<dyn PushChannel>,
    url: url::Url,
    run: u64,
) {
    shared.set_connection(run, ConnectionState::Connecting);
    let mut frames = match channel.connect(url).await {
        Ok(frames) => frames,
        Err(e) => {
            log::warn!("{}: socket connect failed, relying on polling: {}", shared.name, e);
            shared.set_connection(run, ConnectionState::Error);
            return;
        }
    };
    shared.set_connection(run, ConnectionState::Open);

    while let Some(item) = frames.next().await {
        match item {
            Ok(text) => match PushFrame::parse(&text) {
                Ok(PushFrame::Unknown(raw)) => log::debug!("{}: ignoring frame {}", shared.name, raw),
                Ok(frame) => {
                    shared.apply_frame(frame);
                }
                Err(e) => log::warn!("{}: bad frame: {}", shared.name, e),
            },
            Err(e) => {
                log::warn!("{}: socket error, relying on polling: {}", shared.name, e);
                shared.set_connection(run, ConnectionState::Error);
                return;
            }
        }
    }
    log::info!("{}: socket closed", shared.name);
    shared.set_connection(run, ConnectionState::Closed);
}
