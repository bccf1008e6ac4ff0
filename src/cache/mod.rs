//! Snapshot cache
//!
//! Progress snapshots are expensive to compute, so they are kept for a TTL.
//! The map lives inside a single owner task; handles talk to it over a
//! command channel and the owner also listens on the invalidation channel.
//!
//! Every compute is stamped with a ticket when it starts. The owner keeps a
//! result only if its ticket is newer than the one it already holds, so a slow
//! compute that started early can never replace a fresher one. Events are
//! polled before commands, so an invalidation queued ahead of a lookup is
//! always applied first.

use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::analytics::{ProgressSnapshot, SnapshotBuilder};
use crate::clock::Clock;
use crate::error::{ProgressError, Result};
use crate::events::{EventReceiver, EventScope, ProgressEvent};

const COMMAND_BUFFER: usize = 64;
/// Barriers kept for profiles with nothing cached before they are folded
const BARRIER_SLACK: usize = 256;

/// Answer to a lookup
#[derive(Debug)]
pub enum Lookup {
    Fresh(ProgressSnapshot),
    /// Caller must compute; `stale` is what is held, if anything
    Miss {
        ticket: u64,
        stale: Option<ProgressSnapshot>,
    },
}

enum Command {
    Lookup {
        profile_id: String,
        reply: oneshot::Sender<Lookup>,
    },
    Begin {
        reply: oneshot::Sender<u64>,
    },
    Store {
        snapshot: ProgressSnapshot,
        ticket: u64,
        reply: Option<oneshot::Sender<ProgressSnapshot>>,
    },
    Invalidate(EventScope),
    Len(oneshot::Sender<usize>),
    EvictExpired(oneshot::Sender<usize>),
}

struct Cached {
    snapshot: ProgressSnapshot,
    ticket: u64,
    stale: bool,
}

/// Map state owned by the cache task
#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Cached>,
    /// Per profile: tickets at or below this were issued before the last invalidation
    barriers: HashMap<String, u64>,
    global_barrier: u64,
    last_ticket: u64,
}

impl CacheState {
    fn issue(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }

    fn lookup(&mut self, profile_id: &str, now: DateTime<Utc>, ttl: Duration) -> Lookup {
        let held = self.entries.get(profile_id);
        if let Some(cached) = held {
            if !cached.stale && now - cached.snapshot.generated_at < ttl {
                return Lookup::Fresh(cached.snapshot.clone());
            }
        }
        let stale = held.map(|c| c.snapshot.clone());
        Lookup::Miss {
            ticket: self.issue(),
            stale,
        }
    }

    fn barrier(&self, profile_id: &str) -> u64 {
        self.barriers
            .get(profile_id)
            .copied()
            .unwrap_or(0)
            .max(self.global_barrier)
    }

    /// Offer a computed snapshot. Returns the snapshot held afterwards, which
    /// is the offered one unless a newer compute already landed.
    fn accept(&mut self, mut snapshot: ProgressSnapshot, ticket: u64) -> ProgressSnapshot {
        let stale = ticket <= self.barrier(&snapshot.profile_id);

        match self.entries.entry(snapshot.profile_id.clone()) {
            Entry::Occupied(mut held) => {
                let held = held.get_mut();
                if ticket <= held.ticket {
                    debug!(
                        "Discarding snapshot for {} (ticket {} <= {})",
                        snapshot.profile_id, ticket, held.ticket
                    );
                    return held.snapshot.clone();
                }
                if snapshot.generated_at <= held.snapshot.generated_at {
                    snapshot.generated_at = held.snapshot.generated_at + Duration::milliseconds(1);
                }
                held.snapshot = snapshot.clone();
                held.ticket = ticket;
                held.stale = stale;
            }
            Entry::Vacant(slot) => {
                slot.insert(Cached {
                    snapshot: snapshot.clone(),
                    ticket,
                    stale,
                });
            }
        }
        snapshot
    }

    /// Mark the scope stale. Returns the profiles that had a snapshot cached.
    fn invalidate(&mut self, scope: &EventScope) -> Vec<String> {
        match scope {
            EventScope::Profile(id) => {
                self.barriers.insert(id.clone(), self.last_ticket);
                match self.entries.get_mut(id) {
                    Some(cached) => {
                        cached.stale = true;
                        vec![id.clone()]
                    }
                    None => {
                        if self.barriers.len() > self.entries.len() + BARRIER_SLACK {
                            self.compact_barriers();
                        }
                        Vec::new()
                    }
                }
            }
            EventScope::AllProfiles => {
                self.global_barrier = self.last_ticket;
                self.entries
                    .iter_mut()
                    .map(|(id, cached)| {
                        cached.stale = true;
                        id.clone()
                    })
                    .collect()
            }
        }
    }

    fn evict_expired(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, c| now - c.snapshot.generated_at < ttl);
        self.compact_barriers();
        before - self.entries.len()
    }

    /// Barriers of profiles with nothing cached fold into the global one, so
    /// the map never outgrows the entries. Raising the global barrier can only
    /// mark more in-flight computes stale, never fewer.
    fn compact_barriers(&mut self) {
        let entries = &self.entries;
        let mut folded = self.global_barrier;
        self.barriers.retain(|id, barrier| {
            if entries.contains_key(id) {
                return true;
            }
            folded = folded.max(*barrier);
            false
        });
        self.global_barrier = folded;

        let global = self.global_barrier;
        self.barriers.retain(|_, barrier| *barrier > global);
    }
}

struct Owner {
    state: CacheState,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    builder: SnapshotBuilder,
    commands: mpsc::WeakSender<Command>,
}

impl Owner {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: EventReceiver) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.on_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        debug!("Snapshot cache stopped");
    }

    fn on_event(&mut self, event: ProgressEvent) {
        debug!("Invalidating on {}", event.kind.as_str());
        self.invalidate(&event.scope);
    }

    fn invalidate(&mut self, scope: &EventScope) {
        for profile_id in self.state.invalidate(scope) {
            self.spawn_refresh(profile_id);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Lookup { profile_id, reply } => {
                let now = self.clock.now();
                let _ = reply.send(self.state.lookup(&profile_id, now, self.ttl));
            }
            Command::Begin { reply } => {
                let _ = reply.send(self.state.issue());
            }
            Command::Store {
                snapshot,
                ticket,
                reply,
            } => {
                let held = self.state.accept(snapshot, ticket);
                if let Some(reply) = reply {
                    let _ = reply.send(held);
                }
            }
            Command::Invalidate(scope) => self.invalidate(&scope),
            Command::Len(reply) => {
                let _ = reply.send(self.state.entries.len());
            }
            Command::EvictExpired(reply) => {
                let now = self.clock.now();
                let _ = reply.send(self.state.evict_expired(now, self.ttl));
            }
        }
    }

    /// Recompute a stale snapshot in the background
    fn spawn_refresh(&mut self, profile_id: String) {
        let ticket = self.state.issue();
        let builder = self.builder.clone();
        let now = self.clock.now();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let id = profile_id.clone();
            match tokio::task::spawn_blocking(move || builder.build(&id, now)).await {
                Ok(Ok(snapshot)) => {
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx
                            .send(Command::Store {
                                snapshot,
                                ticket,
                                reply: None,
                            })
                            .await;
                    }
                }
                Ok(Err(e)) => warn!("Background refresh for {} failed: {}", profile_id, e),
                Err(e) => warn!("Background refresh for {} panicked: {}", profile_id, e),
            }
        });
    }
}

/// Handle to the snapshot cache. Cheap to clone.
#[derive(Clone)]
pub struct SnapshotCache {
    commands: mpsc::Sender<Command>,
    builder: SnapshotBuilder,
    clock: Arc<dyn Clock>,
}

impl SnapshotCache {
    /// Start the owner task. Must be called from within a tokio runtime.
    pub fn spawn(
        builder: SnapshotBuilder,
        clock: Arc<dyn Clock>,
        ttl: std::time::Duration,
        events: EventReceiver,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(365 * 100));

        let owner = Owner {
            state: CacheState::default(),
            ttl,
            clock: clock.clone(),
            builder: builder.clone(),
            commands: tx.downgrade(),
        };
        tokio::spawn(owner.run(rx, events));

        Self {
            commands: tx,
            builder,
            clock,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ProgressError::CacheClosed)?;
        response.await.map_err(|_| ProgressError::CacheClosed)
    }

    /// Cached snapshot if still fresh, else a recomputed one. A failed
    /// recompute falls back to the stale snapshot, if any.
    pub async fn get_or_compute(&self, profile_id: &str) -> Option<ProgressSnapshot> {
        let lookup = match self
            .request(|reply| Command::Lookup {
                profile_id: profile_id.to_string(),
                reply,
            })
            .await
        {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!("Snapshot lookup for {} failed: {}", profile_id, e);
                return None;
            }
        };

        match lookup {
            Lookup::Fresh(snapshot) => Some(snapshot),
            Lookup::Miss { ticket, stale } => match self.compute(profile_id, ticket).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Could not compute snapshot for {}: {}", profile_id, e);
                    stale
                }
            },
        }
    }

    /// Recompute regardless of what is cached
    pub async fn refresh(&self, profile_id: &str) -> Result<ProgressSnapshot> {
        let ticket = self.request(|reply| Command::Begin { reply }).await?;
        self.compute(profile_id, ticket).await
    }

    /// Recompute every known profile concurrently. Returns how many succeeded.
    pub async fn refresh_all(&self) -> Result<usize> {
        let store = self.builder.store().clone();
        let profile_ids = tokio::task::spawn_blocking(move || store.fetch_all_profile_ids()).await??;
        let total = profile_ids.len();

        let mut tasks = JoinSet::new();
        for profile_id in profile_ids {
            let cache = self.clone();
            tasks.spawn(async move {
                let result = cache.refresh(&profile_id).await;
                (profile_id, result)
            });
        }

        let mut refreshed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => refreshed += 1,
                Ok((profile_id, Err(e))) => warn!("Refresh of {} failed: {}", profile_id, e),
                Err(e) => warn!("Refresh task failed: {}", e),
            }
        }

        info!("Refreshed {}/{} profile snapshots", refreshed, total);
        Ok(refreshed)
    }

    pub async fn invalidate(&self, profile_id: &str) -> Result<()> {
        self.commands
            .send(Command::Invalidate(EventScope::Profile(profile_id.to_string())))
            .await
            .map_err(|_| ProgressError::CacheClosed)
    }

    pub async fn invalidate_all(&self) -> Result<()> {
        self.commands
            .send(Command::Invalidate(EventScope::AllProfiles))
            .await
            .map_err(|_| ProgressError::CacheClosed)
    }

    /// Number of cached snapshots, stale ones included
    pub async fn len(&self) -> Result<usize> {
        self.request(Command::Len).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop snapshots past their TTL. Returns how many were removed.
    pub async fn evict_expired(&self) -> Result<usize> {
        self.request(Command::EvictExpired).await
    }

    async fn compute(&self, profile_id: &str, ticket: u64) -> Result<ProgressSnapshot> {
        let builder = self.builder.clone();
        let id = profile_id.to_string();
        let now = self.clock.now();

        let snapshot = tokio::task::spawn_blocking(move || builder.build(&id, now)).await??;
        self.request(|reply| Command::Store {
            snapshot,
            ticket,
            reply: Some(reply),
        })
        .await
    }
}
