// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-key single flight.
//!
//! The first caller for a key becomes the leader: its load is spawned on the
//! runtime and every caller arriving while the flight is registered
//! subscribes to the same `watch` channel. The flight is unregistered before
//! its outcome is published, so a caller either joins a flight that has not
//! published yet or starts a new one.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::types::{CacheError, Result};

/// What a load produces: a framed value, or `None` for a verified not-found.
pub type LoadOutcome = Result<Option<Bytes>>;

type FlightMap = DashMap<String, Arc<Flight>>;

struct Flight {
    tx: watch::Sender<Option<LoadOutcome>>,
}

/// Unregisters the flight and publishes exactly once. Publishing from `Drop`
/// releases waiters when the load task is aborted.
struct FlightGuard {
    flights: Arc<FlightMap>,
    key: String,
    flight: Arc<Flight>,
    published: bool,
}

impl FlightGuard {
    fn publish(&mut self, outcome: LoadOutcome) {
        if self.published {
            return;
        }
        self.published = true;

        self.flights
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.flight));
        self.flight.tx.send_replace(Some(outcome));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.published {
            error!("Load for key '{}' dropped before completing", self.key);
            self.publish(Err(CacheError::Cancelled));
        }
    }
}

#[derive(Default)]
pub struct FetchCoordinator {
    flights: Arc<FlightMap>,
    loads: AtomicU64,
    joins: AtomicU64,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("in_flight", &self.flights.len())
            .field("loads", &self.loads())
            .field("joins", &self.joins())
            .finish()
    }
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key`, running `load` only if no load for `key` is in flight.
    ///
    /// `load` is polled at most once and only by the leader; a caller that
    /// joins an existing flight drops it unpolled. Every caller attached to
    /// the same flight receives the same outcome.
    pub async fn resolve<Fut>(&self, key: &str, load: Fut) -> LoadOutcome
    where
        Fut: Future<Output = LoadOutcome> + Send + 'static,
    {
        self.resolve_until(key, load, std::future::pending::<()>())
            .await
    }

    /// Like [`resolve`](Self::resolve), but stops waiting with
    /// [`CacheError::Cancelled`] once `cancel` completes. The load itself
    /// keeps running for the remaining waiters.
    pub async fn resolve_until<Fut, C>(&self, key: &str, load: Fut, cancel: C) -> LoadOutcome
    where
        Fut: Future<Output = LoadOutcome> + Send + 'static,
        C: Future,
    {
        let mut rx = self.attach(key, load);

        tokio::select! {
            outcome = wait(&mut rx) => outcome,
            _ = cancel => {
                debug!("Stopped waiting for key '{}'", key);
                Err(CacheError::Cancelled)
            }
        }
    }

    fn attach<Fut>(&self, key: &str, load: Fut) -> watch::Receiver<Option<LoadOutcome>>
    where
        Fut: Future<Output = LoadOutcome> + Send + 'static,
    {
        let flight = match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                self.joins.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight load for key '{}'", key);
                return entry.get().tx.subscribe();
            }
            Entry::Vacant(entry) => {
                let (tx, _) = watch::channel(None);
                let flight = Arc::new(Flight { tx });
                entry.insert(flight.clone());
                flight
            }
        };

        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!("Starting load for key '{}'", key);

        let rx = flight.tx.subscribe();
        let mut guard = FlightGuard {
            flights: self.flights.clone(),
            key: key.to_string(),
            flight,
            published: false,
        };

        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(load).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Load for key '{}' panicked: {}", guard.key, message);
                    Err(CacheError::LoaderPanicked(message))
                }
            };
            guard.publish(outcome);
        });

        rx
    }

    /// Number of keys with a load in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.flights.contains_key(key)
    }

    /// Loads started since construction.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Callers that attached to an existing flight instead of loading.
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }
}

async fn wait(rx: &mut watch::Receiver<Option<LoadOutcome>>) -> LoadOutcome {
    let published = match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value).clone(),
        // sender gone without publishing
        Err(_) => None,
    };
    published.unwrap_or(Err(CacheError::Cancelled))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
