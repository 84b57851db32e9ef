// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation of responses with pending requests

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    io,
    sync::{
        atomic::{AtomicU16, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    codec,
    error::{Error, ProtocolError},
    frame::{tcp::TransactionId, FunctionCode, ResponsePdu},
    unit::UnitId,
};

/// Cancels a scheduled timeout when invoked.
pub struct TimeoutHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl TimeoutHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutHandle").finish_non_exhaustive()
    }
}

/// Timer service that invokes callbacks at a deadline.
pub trait TimeoutScheduler: Send + Sync + 'static {
    fn schedule(&self, deadline: Instant, callback: Box<dyn FnOnce() + Send>) -> TimeoutHandle;
}

/// Schedules every timeout as a separate task on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TimeoutScheduler for TokioScheduler {
    fn schedule(&self, deadline: Instant, callback: Box<dyn FnOnce() + Send>) -> TimeoutHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            callback();
        });
        TimeoutHandle::new(move || task.abort())
    }
}

pub(crate) type Reply = oneshot::Receiver<Result<ResponsePdu, Error>>;

#[derive(Debug)]
struct Pending {
    seq: u64,
    function: FunctionCode,
    unit_id: UnitId,
    started: Instant,
    timeout: Option<TimeoutHandle>,
    reply: oneshot::Sender<Result<ResponsePdu, Error>>,
}

impl Pending {
    fn resolve(self, result: Result<ResponsePdu, Error>) {
        if let Some(timeout) = self.timeout {
            timeout.cancel();
        }
        // The caller might have given up already.
        let _ = self.reply.send(result);
    }
}

/// Registry of in-flight requests on a single connection.
///
/// Every entry is removed exactly once, either by its response, by
/// its timeout, or when the connection fails.
pub(crate) struct Correlator<K> {
    pending: Mutex<HashMap<K, Pending>>,
    next_seq: AtomicU64,
    scheduler: Arc<dyn TimeoutScheduler>,
}

impl<K> fmt::Debug for Correlator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

impl<K> Correlator<K>
where
    K: Copy + Eq + Hash + fmt::Debug + Send + 'static,
{
    pub(crate) fn new(scheduler: Arc<dyn TimeoutScheduler>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            scheduler,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Pending>> {
        // The map stays consistent even if a holder of the lock panicked.
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of pending requests.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Register a request under the first free key yielded by `keys`.
    ///
    /// Returns `None` if all keys are occupied.
    fn register_with(
        self: &Arc<Self>,
        mut keys: impl Iterator<Item = K>,
        function: FunctionCode,
        unit_id: UnitId,
        timeout: Duration,
    ) -> Option<(K, Reply)> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let key = {
            let mut pending = self.lock();
            let key = keys.find(|key| !pending.contains_key(key))?;
            pending.insert(
                key,
                Pending {
                    seq,
                    function,
                    unit_id,
                    started,
                    timeout: None,
                    reply: tx,
                },
            );
            key
        };

        // Scheduled outside of the lock, the callback acquires it.
        let correlator = Arc::downgrade(self);
        let handle = self.scheduler.schedule(
            started + timeout,
            Box::new(move || expire_pending(&correlator, key, seq)),
        );
        match self.lock().get_mut(&key) {
            Some(entry) if entry.seq == seq => entry.timeout = Some(handle),
            // Already resolved.
            _ => handle.cancel(),
        }
        Some((key, rx))
    }

    /// Resolve the pending request by its response PDU.
    ///
    /// Returns `false` if no request is pending under this key, i.e.
    /// the response is stale or unsolicited.
    pub(crate) fn complete(&self, key: K, unit_id: UnitId, pdu: Bytes) -> bool {
        let Some(pending) = self.lock().remove(&key) else {
            log::debug!("Dropping response without pending request: {key:?}");
            return false;
        };
        let result = if pending.unit_id == unit_id {
            codec::decode_response(pending.function, pdu)
        } else {
            Err(ProtocolError::HeaderMismatch {
                expected: pending.unit_id,
                actual: unit_id,
            }
            .into())
        };
        pending.resolve(result);
        true
    }

    /// Resolve the pending request with an error.
    pub(crate) fn fail(&self, key: K, error: Error) -> bool {
        let Some(pending) = self.lock().remove(&key) else {
            return false;
        };
        pending.resolve(Err(error));
        true
    }

    /// Remove a pending request without resolving it.
    pub(crate) fn remove(&self, key: K) {
        if let Some(pending) = self.lock().remove(&key) {
            if let Some(timeout) = pending.timeout {
                timeout.cancel();
            }
        }
    }

    /// Resolve all pending requests with an error.
    pub(crate) fn fail_all(&self, error: &Error) {
        let drained = self.lock().drain().collect::<Vec<_>>();
        if !drained.is_empty() {
            log::debug!("Failing {} pending request(s): {error}", drained.len());
        }
        for (_, pending) in drained {
            pending.resolve(Err(error.duplicate()));
        }
    }

    fn expire(&self, key: K, seq: u64) {
        let pending = {
            let mut pending = self.lock();
            let current = pending.get(&key).map_or(false, |entry| entry.seq == seq);
            if current {
                pending.remove(&key)
            } else {
                None
            }
        };
        if let Some(mut pending) = pending {
            let elapsed = pending.started.elapsed();
            log::debug!("Request {key:?} timed out after {elapsed:?}");
            // Fired already, nothing to cancel.
            pending.timeout = None;
            pending.resolve(Err(Error::Timeout { elapsed }));
        }
    }
}

fn expire_pending<K>(correlator: &Weak<Correlator<K>>, key: K, seq: u64)
where
    K: Copy + Eq + Hash + fmt::Debug + Send + 'static,
{
    if let Some(correlator) = correlator.upgrade() {
        correlator.expire(key, seq);
    }
}

/// Rolling 16-bit sequence of transaction identifiers.
#[derive(Debug, Default)]
pub(crate) struct TransactionIds {
    next: AtomicU16,
}

impl TransactionIds {
    /// The next id, wrapping from 65535 to 0.
    pub(crate) fn next(&self) -> TransactionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Correlates TCP responses by their transaction identifier.
#[derive(Debug)]
pub(crate) struct TcpTransactions {
    ids: TransactionIds,
    correlator: Arc<Correlator<TransactionId>>,
}

impl TcpTransactions {
    pub(crate) fn new(scheduler: Arc<dyn TimeoutScheduler>) -> Self {
        Self {
            ids: TransactionIds::default(),
            correlator: Arc::new(Correlator::new(scheduler)),
        }
    }

    pub(crate) fn correlator(&self) -> &Arc<Correlator<TransactionId>> {
        &self.correlator
    }

    /// Reserve the next free transaction id for a request.
    ///
    /// Ids that are still pending are skipped.
    pub(crate) fn register(
        &self,
        function: FunctionCode,
        unit_id: UnitId,
        timeout: Duration,
    ) -> Result<(TransactionId, Reply), Error> {
        let keys = (0..=u16::MAX).map(|_| self.ids.next());
        self.correlator
            .register_with(keys, function, unit_id, timeout)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::WouldBlock, "all transaction ids are pending").into()
            })
    }
}

/// Correlates RTU responses strictly by order: one request at a time.
#[derive(Debug)]
pub(crate) struct RtuTransactions {
    correlator: Arc<Correlator<()>>,
}

impl RtuTransactions {
    pub(crate) fn new(scheduler: Arc<dyn TimeoutScheduler>) -> Self {
        Self {
            correlator: Arc::new(Correlator::new(scheduler)),
        }
    }

    pub(crate) fn correlator(&self) -> &Arc<Correlator<()>> {
        &self.correlator
    }

    /// Occupy the single slot for a request.
    pub(crate) fn register(
        &self,
        function: FunctionCode,
        unit_id: UnitId,
        timeout: Duration,
    ) -> Result<Reply, Error> {
        self.correlator
            .register_with(std::iter::once(()), function, unit_id, timeout)
            .map(|((), reply)| reply)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::WouldBlock, "another request is pending").into()
            })
    }
}
