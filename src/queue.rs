//! At-least-once dispatch queue carrying extraction jobs to workers.
//!
//! In-process stand-in for a hosted queue service with the usual contract:
//! a received job stays invisible to other consumers for a visibility
//! window, an unacknowledged lease expires back onto the queue, and a job
//! delivered more than `max_receive_count` times moves to a dead-letter
//! store for operator inspection instead of being redelivered. Ordering
//! across jobs is not guaranteed; each job carries its own completion token
//! so cross-job ordering does not matter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// A queued unit of extraction work. Created by the workflow run when it
/// enters the suspended state; consumed and discarded by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub run_id: String,
    pub text: String,
    pub completion_token: String,
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempts so far; incremented on each receive.
    pub receive_count: u32,
}

impl ExtractionJob {
    pub fn new(run_id: String, text: String, completion_token: String) -> Self {
        Self {
            run_id,
            text,
            completion_token,
            enqueued_at: Utc::now(),
            receive_count: 0,
        }
    }
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a delivered job stays invisible before its lease expires.
    pub visibility_timeout: Duration,
    /// Deliveries allowed before a job dead-letters instead of redelivering.
    pub max_receive_count: u32,
    /// How long dead letters are kept for inspection.
    pub dead_letter_retention: chrono::Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 3,
            dead_letter_retention: chrono::Duration::days(14),
        }
    }
}

/// Lease on one delivered job. Acknowledging through the handle removes the
/// job permanently; dropping it lets the lease expire and the job redeliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    message_id: String,
}

/// A job that exhausted its delivery budget, kept for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub job: ExtractionJob,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Envelope {
    message_id: String,
    job: ExtractionJob,
    lease_expires: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Envelope>,
    in_flight: HashMap<String, Envelope>,
    dead: Vec<DeadLetter>,
}

/// Multi-producer, multi-consumer handle to the queue. Cloning shares the
/// underlying state.
#[derive(Clone)]
pub struct DispatchQueue {
    config: QueueConfig,
    inner: Arc<Mutex<Inner>>,
}

impl DispatchQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Accept a job for eventual at-least-once delivery. Returns the
    /// assigned message id.
    pub fn enqueue(&self, job: ExtractionJob) -> String {
        let message_id = Uuid::new_v4().to_string();
        debug!(%message_id, run_id = %job.run_id, "job enqueued");
        self.inner
            .lock()
            .expect("dispatch queue lock poisoned")
            .ready
            .push_back(Envelope {
                message_id: message_id.clone(),
                job,
                lease_expires: None,
            });
        message_id
    }

    /// Deliver the next visible job, if any, leasing it for the visibility
    /// window. Expired leases are reclaimed (or dead-lettered) first.
    pub fn receive(&self) -> Option<(ExtractionJob, DeliveryHandle)> {
        let mut inner = self.inner.lock().expect("dispatch queue lock poisoned");
        self.reclaim_expired(&mut inner);

        let mut envelope = inner.ready.pop_front()?;
        envelope.job.receive_count += 1;
        envelope.lease_expires = Some(Instant::now() + self.config.visibility_timeout);

        let handle = DeliveryHandle {
            message_id: envelope.message_id.clone(),
        };
        let job = envelope.job.clone();
        debug!(
            message_id = %envelope.message_id,
            run_id = %job.run_id,
            attempt = job.receive_count,
            "job delivered"
        );
        inner.in_flight.insert(envelope.message_id.clone(), envelope);
        Some((job, handle))
    }

    /// Renew the lease on a delivered job. Workers call this before slow
    /// downstream work so the lease never lapses passively mid-processing.
    pub fn extend_visibility(&self, handle: &DeliveryHandle, extra: Duration) -> bool {
        let mut inner = self.inner.lock().expect("dispatch queue lock poisoned");
        match inner.in_flight.get_mut(&handle.message_id) {
            Some(envelope) => {
                envelope.lease_expires = Some(Instant::now() + extra);
                true
            }
            None => false,
        }
    }

    /// Permanently remove a delivered job. Returns `false` if the lease had
    /// already expired or the job was already acknowledged.
    pub fn acknowledge(&self, handle: &DeliveryHandle) -> bool {
        let removed = self
            .inner
            .lock()
            .expect("dispatch queue lock poisoned")
            .in_flight
            .remove(&handle.message_id)
            .is_some();
        if removed {
            debug!(message_id = %handle.message_id, "job acknowledged");
        } else {
            warn!(message_id = %handle.message_id, "acknowledge for unknown or expired lease");
        }
        removed
    }

    /// Dead letters still inside the retention window, newest last. Entries
    /// past retention are purged on inspection.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        let mut inner = self.inner.lock().expect("dispatch queue lock poisoned");
        let retention = self.config.dead_letter_retention;
        let now = Utc::now();
        inner.dead.retain(|d| now - d.dead_at < retention);
        inner.dead.clone()
    }

    pub fn ready_len(&self) -> usize {
        self.inner
            .lock()
            .expect("dispatch queue lock poisoned")
            .ready
            .len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner
            .lock()
            .expect("dispatch queue lock poisoned")
            .in_flight
            .len()
    }

    fn reclaim_expired(&self, inner: &mut Inner) {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, e)| e.lease_expires.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for message_id in expired {
            let Some(mut envelope) = inner.in_flight.remove(&message_id) else {
                continue;
            };
            if envelope.job.receive_count >= self.config.max_receive_count {
                warn!(
                    %message_id,
                    run_id = %envelope.job.run_id,
                    deliveries = envelope.job.receive_count,
                    "delivery budget exhausted; moving job to dead-letter store"
                );
                inner.dead.push(DeadLetter {
                    message_id,
                    reason: format!(
                        "not acknowledged after {} deliveries",
                        envelope.job.receive_count
                    ),
                    dead_at: Utc::now(),
                    job: envelope.job,
                });
            } else {
                debug!(%message_id, run_id = %envelope.job.run_id, "lease expired; job returned to queue");
                envelope.lease_expires = None;
                inner.ready.push_back(envelope);
            }
        }
    }
}
