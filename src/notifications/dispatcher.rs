//! Background fan-out of committed changes

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use uuid::Uuid;

use super::channels::{ChannelResult, DeliveryStatus};
use super::summary::describe;
use super::{Change, WebhookChannel};
use crate::config::DispatcherConfig;
use crate::metrics;
use crate::models::{Notification, NotificationChannel, Role, WebhookScope};
use crate::storage::Store;

/// What to do with queued and running jobs on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finish queued and running jobs, bounded by the configured grace period
    Drain,
    /// Abort running jobs and discard the queue
    Abandon,
}

struct DispatchContext {
    store: Arc<dyn Store>,
    webhooks: WebhookChannel,
}

/// Handle to the fan-out worker
///
/// Cheap to clone. At most `max_in_flight` jobs run at once; the rest wait in
/// the queue. `dispatch` never waits: when the queue is full the job is dropped
/// and logged, so a slow receiver can never stall a request.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Change>,
    control: Arc<watch::Sender<Option<ShutdownMode>>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Dispatcher {
    /// Spawn the worker on the current runtime
    pub fn start(store: Arc<dyn Store>, config: &DispatcherConfig) -> ChannelResult<Self> {
        let webhooks = WebhookChannel::new(config.webhook_timeout())?;
        let ctx = Arc::new(DispatchContext { store, webhooks });

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (control, control_rx) = watch::channel(None);

        let limits = WorkerLimits {
            max_in_flight: config.max_in_flight.max(1),
            grace: config.shutdown_grace(),
        };
        let worker = tokio::spawn(run_worker(ctx, rx, control_rx, limits));

        tracing::info!(
            queue_capacity = config.queue_capacity,
            max_in_flight = limits.max_in_flight,
            webhook_timeout_ms = config.webhook_timeout_ms,
            "Dispatcher started"
        );

        Ok(Self {
            tx,
            control: Arc::new(control),
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Enqueue a change; returns whether it was accepted
    pub fn dispatch(&self, change: Change) -> bool {
        let trigger = change.trigger;
        match self.tx.try_send(change) {
            Ok(()) => {
                metrics::record_dispatch_job("queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_dispatch_job("dropped");
                tracing::warn!(%trigger, "Dispatch queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::record_dispatch_job("closed");
                tracing::debug!(%trigger, "Dispatcher stopped, dropping job");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Safe to call from several clones; only the first call waits.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.control.send_replace(Some(mode));

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Dispatcher worker panicked");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkerLimits {
    max_in_flight: usize,
    grace: Duration,
}

async fn run_worker(
    ctx: Arc<DispatchContext>,
    mut rx: mpsc::Receiver<Change>,
    mut control: watch::Receiver<Option<ShutdownMode>>,
    limits: WorkerLimits,
) {
    let mut jobs = JoinSet::new();

    let mode = loop {
        tokio::select! {
            changed = control.changed() => {
                match changed {
                    Ok(()) => {
                        if let Some(mode) = *control.borrow_and_update() {
                            break mode;
                        }
                    }
                    Err(_) => break ShutdownMode::Drain,
                }
            }
            // Jobs stay queued while every slot is busy
            job = rx.recv(), if jobs.len() < limits.max_in_flight => match job {
                Some(change) => {
                    jobs.spawn(process(Arc::clone(&ctx), change));
                }
                None => break ShutdownMode::Drain,
            },
            Some(result) = jobs.join_next(), if !jobs.is_empty() => log_join(result),
        }
    };

    rx.close();

    match mode {
        ShutdownMode::Drain => {
            let mut finished = 0usize;
            let drained = tokio::time::timeout(limits.grace, async {
                let mut queue_open = true;
                loop {
                    if queue_open && jobs.len() < limits.max_in_flight {
                        match rx.recv().await {
                            Some(change) => {
                                jobs.spawn(process(Arc::clone(&ctx), change));
                                continue;
                            }
                            None => queue_open = false,
                        }
                    }
                    match jobs.join_next().await {
                        Some(result) => {
                            finished += 1;
                            log_join(result);
                        }
                        None if !queue_open => break,
                        None => {}
                    }
                }
            })
            .await;

            match drained {
                Ok(()) => tracing::info!(finished, "Dispatcher drained"),
                Err(_) => {
                    let mut discarded = 0usize;
                    while rx.try_recv().is_ok() {
                        discarded += 1;
                    }
                    tracing::warn!(
                        finished,
                        remaining = jobs.len(),
                        discarded,
                        grace_secs = limits.grace.as_secs(),
                        "Dispatcher grace period elapsed, aborting remaining jobs"
                    );
                    jobs.abort_all();
                }
            }
        }
        ShutdownMode::Abandon => {
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            let aborted = jobs.len();
            jobs.abort_all();
            tracing::warn!(discarded, aborted, "Dispatcher abandoned pending jobs");
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Dispatch job panicked");
        }
    }
}

async fn process(ctx: Arc<DispatchContext>, change: Change) {
    let actor = ctx.actor_name(change.actor_id).await;
    let (notified, deliveries) = tokio::join!(
        ctx.notify_recipients(&change, &actor),
        ctx.deliver_webhooks(&change)
    );

    let delivered = deliveries.iter().filter(|d| d.success).count();
    tracing::debug!(
        trigger = %change.trigger,
        notified,
        webhooks = deliveries.len(),
        delivered,
        "Change fanned out"
    );
}

impl DispatchContext {
    async fn actor_name(&self, actor_id: Option<Uuid>) -> String {
        let Some(actor_id) = actor_id else {
            return String::from("System");
        };
        match self.store.user(actor_id).await {
            Ok(Some(user)) => user.name,
            Ok(None) => String::from("Someone"),
            Err(e) => {
                tracing::warn!(error = %e, %actor_id, "Failed to resolve actor name");
                String::from("Someone")
            }
        }
    }

    /// Users to notify: everyone holding a shift in the event, plus the
    /// assignee whose shift changed, minus the actor
    async fn recipients(&self, change: &Change, event_id: Uuid) -> Vec<Uuid> {
        let mut recipients: BTreeSet<Uuid> = match self.store.event_assignees(event_id).await {
            Ok(assignees) => assignees.into_iter().collect(),
            Err(e) => {
                tracing::error!(error = %e, %event_id, "Failed to load event assignees");
                BTreeSet::new()
            }
        };

        if let Some(affected) = change.affected_user() {
            recipients.insert(affected);
        }
        if let Some(actor) = change.actor_id {
            recipients.remove(&actor);
        }

        recipients.into_iter().collect()
    }

    async fn wants_in_app(&self, user_id: Uuid, change: &Change) -> bool {
        match self.store.user(user_id).await {
            Ok(Some(user)) if user.is_active && user.role != Role::Dummy => {}
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(error = %e, %user_id, "Failed to load recipient");
                return false;
            }
        }

        match self
            .store
            .notification_preference(user_id, change.trigger, NotificationChannel::InApp)
            .await
        {
            Ok(Some(enabled)) => enabled,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    %user_id,
                    trigger = %change.trigger,
                    "Preference lookup failed, defaulting to enabled"
                );
                true
            }
        }
    }

    /// Write in-app notifications; returns how many were created
    async fn notify_recipients(&self, change: &Change, actor: &str) -> usize {
        if change.trigger.is_global_only() || !change.trigger.notifies_users() {
            return 0;
        }
        let Some(event_id) = change.event_id() else {
            return 0;
        };

        let summary = describe(change, actor);
        let mut created = 0;

        for user_id in self.recipients(change, event_id).await {
            if !self.wants_in_app(user_id, change).await {
                continue;
            }

            let notification = Notification {
                id: Uuid::new_v4(),
                recipient_id: user_id,
                event_id: Some(event_id),
                title: summary.title.clone(),
                body: summary.body.clone(),
                trigger: change.trigger,
                is_read: false,
                created_at: Utc::now(),
            };

            match self.store.create_notification(notification).await {
                Ok(_) => {
                    created += 1;
                    metrics::record_notification(change.trigger.as_str());
                }
                Err(e) => {
                    tracing::error!(error = %e, %user_id, "Failed to store notification");
                }
            }
        }

        created
    }

    /// POST to every enabled webhook subscribed to the trigger, concurrently
    async fn deliver_webhooks(&self, change: &Change) -> Vec<DeliveryStatus> {
        let scope = if change.trigger.is_global_only() {
            WebhookScope::Global
        } else if let Some(event_id) = change.event_id() {
            WebhookScope::Event { event_id }
        } else {
            return Vec::new();
        };

        let configs = match self.store.webhook_configs(scope).await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::error!(error = %e, trigger = %change.trigger, "Failed to load webhooks");
                return Vec::new();
            }
        };

        let targets: Vec<_> = configs
            .into_iter()
            .filter(|config| config.accepts(change.trigger))
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }

        let payload = change.webhook_payload();
        join_all(
            targets
                .iter()
                .map(|config| self.webhooks.deliver(config, &payload)),
        )
        .await
    }
}
