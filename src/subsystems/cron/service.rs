//! Cron timer loop.
//!
//! Deadlines live in a `BTreeMap<Instant, Entry>`; the loop sleeps until the
//! earliest one with `sleep_until`, so an idle scheduler does no work.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::supervisor::bus::{BusHandle, BusPayload, CronEntryInfo, CronScheduleSpec};

pub enum CronCommand {
    Schedule {
        target_method: String,
        payload_json: String,
        spec: CronScheduleSpec,
        reply: oneshot::Sender<String>,
    },
    Cancel {
        schedule_id: String,
        reply: oneshot::Sender<bool>,
    },
    List {
        reply: oneshot::Sender<Vec<CronEntryInfo>>,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    target_method: String,
    payload_json: String,
    spec: CronScheduleSpec,
}

#[derive(Default)]
struct Queue {
    by_deadline: BTreeMap<Instant, Entry>,
    by_id: HashMap<String, Instant>,
}

impl Queue {
    /// Insert, nudging the deadline by 1ns until the key is free.
    fn insert(&mut self, mut deadline: Instant, entry: Entry) {
        while self.by_deadline.contains_key(&deadline) {
            deadline += Duration::from_nanos(1);
        }
        self.by_id.insert(entry.id.clone(), deadline);
        self.by_deadline.insert(deadline, entry);
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.by_id.remove(id) {
            Some(deadline) => self.by_deadline.remove(&deadline).is_some(),
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().copied()
    }

    fn pop_first(&mut self) -> Option<(Instant, Entry)> {
        let (deadline, entry) = self.by_deadline.pop_first()?;
        self.by_id.remove(&entry.id);
        Some((deadline, entry))
    }

    fn list(&self) -> Vec<CronEntryInfo> {
        self.by_deadline
            .iter()
            .map(|(deadline, e)| CronEntryInfo {
                schedule_id: e.id.clone(),
                target_method: e.target_method.clone(),
                spec: e.spec.clone(),
                next_fire_unix_ms: instant_to_unix_ms(*deadline),
            })
            .collect()
    }
}

pub struct CronService {
    bus: BusHandle,
    cmd_rx: mpsc::Receiver<CronCommand>,
    shutdown: CancellationToken,
}

impl CronService {
    pub fn new(bus: BusHandle, cmd_rx: mpsc::Receiver<CronCommand>, shutdown: CancellationToken) -> Self {
        Self { bus, cmd_rx, shutdown }
    }

    pub async fn run(mut self) {
        let mut queue = Queue::default();
        info!("cron service running");

        loop {
            let next = queue.next_deadline();
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!(dropped = queue.by_id.len(), "cron service shutting down");
                    break;
                }

                Some(cmd) = self.cmd_rx.recv() => self.handle(cmd, &mut queue),

                _ = async {
                    match next {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some((deadline, entry)) = queue.pop_first() {
                        self.fire(&entry);
                        if let CronScheduleSpec::Interval { every_secs } = entry.spec {
                            queue.insert(deadline + Duration::from_secs(every_secs), entry);
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, cmd: CronCommand, queue: &mut Queue) {
        match cmd {
            CronCommand::Schedule { target_method, payload_json, spec, reply } => {
                let id = Uuid::new_v4().to_string();
                let deadline = first_deadline(&spec);
                debug!(schedule_id = %id, %target_method, ?spec, "scheduled");
                queue.insert(deadline, Entry { id: id.clone(), target_method, payload_json, spec });
                let _ = reply.send(id);
            }
            CronCommand::Cancel { schedule_id, reply } => {
                let removed = queue.remove(&schedule_id);
                debug!(%schedule_id, removed, "cancel");
                let _ = reply.send(removed);
            }
            CronCommand::List { reply } => {
                let _ = reply.send(queue.list());
            }
        }
    }

    fn fire(&self, entry: &Entry) {
        let payload = match serde_json::from_str::<BusPayload>(&entry.payload_json) {
            Ok(p) => p,
            Err(e) => {
                warn!(schedule_id = %entry.id, error = %e, "cron payload no longer decodes; skipping");
                return;
            }
        };
        debug!(schedule_id = %entry.id, target = %entry.target_method, "cron firing");
        if let Err(e) = self.bus.notify(&entry.target_method, payload) {
            warn!(schedule_id = %entry.id, target = %entry.target_method, error = %e, "cron notification dropped");
        }
    }
}

fn first_deadline(spec: &CronScheduleSpec) -> Instant {
    let now = Instant::now();
    match spec {
        CronScheduleSpec::Once { at_unix_ms } => {
            let target = UNIX_EPOCH + Duration::from_millis(*at_unix_ms);
            // Past targets fire immediately.
            target.duration_since(SystemTime::now()).map_or(now, |delta| now + delta)
        }
        CronScheduleSpec::Interval { every_secs } => now + Duration::from_secs(*every_secs),
    }
}

/// Best-effort wall-clock rendering of a deadline, for `cron/list` only.
fn instant_to_unix_ms(instant: Instant) -> u64 {
    let now = Instant::now();
    let unix_now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let at = if instant >= now {
        Some(unix_now + (instant - now))
    } else {
        unix_now.checked_sub(now - instant)
    };
    at.map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::bus::{BusMessage, SupervisorBus};
    use tokio::time;

    fn spawn_service() -> (mpsc::Sender<CronCommand>, CancellationToken, mpsc::Receiver<BusMessage>) {
        let bus = SupervisorBus::new(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        tokio::spawn(CronService::new(bus.handle.clone(), cmd_rx, shutdown.clone()).run());
        (cmd_tx, shutdown, bus.rx)
    }

    async fn schedule(tx: &mpsc::Sender<CronCommand>, target: &str, spec: CronScheduleSpec) -> String {
        let (reply, rx) = oneshot::channel();
        tx.send(CronCommand::Schedule {
            target_method: target.into(),
            payload_json: serde_json::to_string(&BusPayload::Empty).unwrap(),
            spec,
            reply,
        })
        .await
        .unwrap();
        rx.await.unwrap()
    }

    async fn list(tx: &mpsc::Sender<CronCommand>) -> Vec<CronEntryInfo> {
        let (reply, rx) = oneshot::channel();
        tx.send(CronCommand::List { reply }).await.unwrap();
        rx.await.unwrap()
    }

    async fn next_notification(rx: &mut mpsc::Receiver<BusMessage>) -> String {
        let msg = time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        match msg {
            BusMessage::Notification { method, .. } => method,
            BusMessage::Request { .. } => panic!("expected a notification"),
        }
    }

    #[test]
    fn queue_keys_stay_unique() {
        let mut q = Queue::default();
        let at = Instant::now();
        for id in ["a", "b"] {
            let entry = Entry {
                id: id.into(),
                target_method: "t/x".into(),
                payload_json: "\"Empty\"".into(),
                spec: CronScheduleSpec::Interval { every_secs: 1 },
            };
            q.insert(at, entry);
        }
        assert_eq!(q.by_deadline.len(), 2);
        assert!(q.remove("b"));
        assert!(!q.remove("b"));
        assert_eq!(q.pop_first().map(|(_, e)| e.id), Some("a".to_string()));
    }

    #[tokio::test]
    async fn interval_repeats_and_stays_listed() {
        time::pause();
        let (tx, shutdown, mut rx) = spawn_service();
        schedule(&tx, "agents/pm/triage", CronScheduleSpec::Interval { every_secs: 10 }).await;

        time::advance(Duration::from_secs(11)).await;
        assert_eq!(next_notification(&mut rx).await, "agents/pm/triage");
        time::advance(Duration::from_secs(10)).await;
        assert_eq!(next_notification(&mut rx).await, "agents/pm/triage");

        assert_eq!(list(&tx).await.len(), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn once_in_the_past_fires_and_is_dropped() {
        time::pause();
        let (tx, shutdown, mut rx) = spawn_service();
        schedule(&tx, "agents/pm/standup", CronScheduleSpec::Once { at_unix_ms: 0 }).await;

        time::advance(Duration::from_millis(10)).await;
        assert_eq!(next_notification(&mut rx).await, "agents/pm/standup");
        assert!(list(&tx).await.is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancel_before_fire() {
        time::pause();
        let (tx, shutdown, mut rx) = spawn_service();
        let id = schedule(&tx, "x/y", CronScheduleSpec::Interval { every_secs: 5 }).await;

        let (reply, ack) = oneshot::channel();
        tx.send(CronCommand::Cancel { schedule_id: id, reply }).await.unwrap();
        assert!(ack.await.unwrap());

        time::advance(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());
        shutdown.cancel();
    }
}
