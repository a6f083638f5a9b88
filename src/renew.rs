//! Lease renewal scheduler.
//!
//! Holds the set of mappings marked for renewal and re-issues each one
//! at half its lease lifetime, forever, until the entry is cancelled or
//! a renewal fails. Outcomes leave the scheduler as [`RenewalEvent`]s
//! over a channel; nothing about presentation lives in here.
//!
//! Per-entry state machine:
//! `Scheduled → (timer) → Renewing → { Scheduled | Cancelled }`.
//! Cancellation is cooperative: toggling an entry off marks it inactive
//! and the next fire drops it without re-issuing. Renewal failure is
//! terminal for the entry — no retry, and the failure is surfaced.
//!
//! State lives only in process memory. A restart forgets every entry;
//! that is a documented limitation, not a recovery gap.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::error::{UpnpError, UpnpResult};
use crate::mapping::{MappingIdentity, PortMapping};

/// Smallest lease a renewal will be scheduled for. Below this the
/// renewal cadence (half the lease) sits too close to expiry to be
/// worth racing the gateway.
pub const MIN_RENEWAL_LEASE_SECS: u32 = 10;

/// The network side of a renewal fire: re-issue `AddPortMapping` with
/// the entry's original arguments. The production implementation is
/// [`crate::client::IgdClient`]; tests inject a recording mock.
pub trait LeaseRefresher: Send + Sync + 'static {
    fn refresh(&self, mapping: &PortMapping) -> impl Future<Output = UpnpResult<()>> + Send;
}

/// Renewal outcome delivered to whatever layer observes the scheduler
#[derive(Debug)]
pub enum RenewalEvent {
    /// Re-issue succeeded; next fire in `next_in`
    Renewed {
        identity: MappingIdentity,
        next_in: Duration,
    },
    /// Entry found toggled off at fire time and dropped without re-issuing
    Cancelled { identity: MappingIdentity },
    /// Re-issue failed; entry dropped (terminal, no retry)
    Failed {
        identity: MappingIdentity,
        detail: String,
    },
}

struct RenewalEntry {
    mapping: PortMapping,
    /// User-controlled toggle, sampled at the next fire
    active: bool,
    next_fire_at: Instant,
}

type EntryTable = Arc<Mutex<HashMap<MappingIdentity, RenewalEntry>>>;

/// Owns the renewal entry table and the driver task walking it
pub struct RenewalScheduler {
    entries: EntryTable,
    wake: Arc<Notify>,
    events: Option<UnboundedReceiver<RenewalEvent>>,
    driver: JoinHandle<()>,
}

impl RenewalScheduler {
    /// Spawn the scheduler with the given refresher. The driver task
    /// sleeps until the earliest `next_fire_at` and is woken early when
    /// the entry set changes.
    pub fn spawn<R: LeaseRefresher>(refresher: R) -> Self {
        let entries: EntryTable = Arc::new(Mutex::new(HashMap::new()));
        let wake = Arc::new(Notify::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = tokio::spawn(drive(entries.clone(), wake.clone(), tx, refresher));

        Self {
            entries,
            wake,
            events: Some(rx),
            driver,
        }
    }

    /// Register a mapping for renewal. First fire lands at
    /// `now + lease/2`. Lease validation happens here, before any
    /// network action.
    pub fn register(&self, mapping: PortMapping) -> UpnpResult<()> {
        mapping.validate()?;
        if mapping.lease_duration < MIN_RENEWAL_LEASE_SECS {
            return Err(UpnpError::LeaseTooShort(mapping.lease_duration));
        }
        let identity = mapping.identity();
        let next_fire_at = Instant::now() + half_lease(&mapping);
        tracing::info!(
            "renewal registered for {identity}, first fire in {}s",
            mapping.lease_duration / 2
        );
        self.entries.lock().insert(
            identity,
            RenewalEntry {
                mapping,
                active: true,
                next_fire_at,
            },
        );
        self.wake.notify_one();
        Ok(())
    }

    /// Mark an entry inactive. The entry is dropped at its next
    /// scheduled fire without re-issuing; an in-flight renewal is not
    /// interrupted. Unknown identities are a no-op.
    pub fn cancel(&self, identity: &MappingIdentity) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(identity) {
            entry.active = false;
            tracing::info!("renewal for {identity} toggled off, drops at next fire");
        }
    }

    /// Whether an identity currently has a (possibly toggled-off) entry
    pub fn is_registered(&self, identity: &MappingIdentity) -> bool {
        self.entries.lock().contains_key(identity)
    }

    /// Take the outcome event receiver. Yields `None` after the first
    /// call.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<RenewalEvent>> {
        self.events.take()
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn half_lease(mapping: &PortMapping) -> Duration {
    Duration::from_secs(u64::from(mapping.lease_duration) / 2)
}

async fn drive<R: LeaseRefresher>(
    entries: EntryTable,
    wake: Arc<Notify>,
    events: UnboundedSender<RenewalEvent>,
    refresher: R,
) {
    loop {
        let next_deadline = entries
            .lock()
            .values()
            .map(|e| e.next_fire_at)
            .min();

        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = time::sleep_until(deadline) => {
                        fire_due(&entries, &events, &refresher).await;
                    }
                    // Entry set changed; recompute the deadline
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
}

async fn fire_due<R: LeaseRefresher>(
    entries: &EntryTable,
    events: &UnboundedSender<RenewalEvent>,
    refresher: &R,
) {
    let now = Instant::now();
    let due: Vec<MappingIdentity> = entries
        .lock()
        .iter()
        .filter(|(_, e)| e.next_fire_at <= now)
        .map(|(id, _)| *id)
        .collect();

    for identity in due {
        // Sample the toggle at fire time; drop without re-issuing when off
        let mapping = {
            let mut table = entries.lock();
            match table.get(&identity) {
                Some(entry) if !entry.active => {
                    table.remove(&identity);
                    tracing::info!("renewal for {identity} cancelled");
                    let _ = events.send(RenewalEvent::Cancelled { identity });
                    continue;
                }
                Some(entry) => entry.mapping.clone(),
                // Removed between collection and fire
                None => continue,
            }
        };

        match refresher.refresh(&mapping).await {
            Ok(()) => {
                let next_in = half_lease(&mapping);
                if let Some(entry) = entries.lock().get_mut(&identity) {
                    entry.next_fire_at = Instant::now() + next_in;
                }
                tracing::debug!("renewed {identity}, next fire in {next_in:?}");
                let _ = events.send(RenewalEvent::Renewed { identity, next_in });
            }
            Err(e) => {
                entries.lock().remove(&identity);
                tracing::warn!("renewal for {identity} failed, entry dropped: {e}");
                let _ = events.send(RenewalEvent::Failed {
                    identity,
                    detail: e.to_string(),
                });
            }
        }
    }
}
