use super::{Consumer, Messagebus, Producer, Requester, Responser};
use crate::config::Config;
use crate::error::BusError;
use crate::message::Message;
use async_trait::async_trait;
use keyed_priority_queue::KeyedPriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex};
use tokio::task;
use tokio::time::{sleep, timeout, Duration, Instant};
use uuid::Uuid;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Queue entry keyed by an internal sequence number, so client-supplied
/// message ids may repeat without clobbering each other.
#[derive(Debug)]
pub struct QueueItem {
    pub seq: u64,
    pub expires_at: Option<Instant>,
}

impl Eq for QueueItem {}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Hash for QueueItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

/// Higher message priority first, then insertion order.
type Rank = (i32, Reverse<u64>);

struct Queue {
    pq: KeyedPriorityQueue<QueueItem, Rank>,
    messages: HashMap<u64, Message>,
}

impl Queue {
    fn new() -> Self {
        Queue {
            pq: KeyedPriorityQueue::new(),
            messages: HashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.pq.is_empty() && self.messages.is_empty()
    }
}

#[derive(Default)]
struct BusState {
    queues: HashMap<String, Queue>,
    /// Requesters waiting on a reply, keyed by their temporary reply queue.
    pending: HashMap<String, oneshot::Sender<Message>>,
    seq: u64,
}

impl BusState {
    fn push(&mut self, queue_name: &str, mut msg: Message, retention: Option<Duration>) {
        let header = &mut msg.message_header;
        if header.message_id.is_none() {
            header.message_id = Some(Uuid::new_v4().to_string());
        }
        if header.timestamp.is_none() {
            header.timestamp = Some(now_millis());
        }

        self.seq += 1;
        let seq = self.seq;
        let item = QueueItem {
            seq,
            expires_at: retention.map(|r| Instant::now() + r),
        };
        let rank = (header.priority, Reverse(seq));

        let queue = self
            .queues
            .entry(queue_name.to_string())
            .or_insert_with(Queue::new);
        queue.pq.push(item, rank);
        queue.messages.insert(seq, msg);
    }

    fn pull(&mut self, queue_name: &str, num: usize) -> Vec<Message> {
        let queue = match self.queues.get_mut(queue_name) {
            Some(q) => q,
            None => return Vec::new(),
        };

        let now = Instant::now();
        let mut out = Vec::with_capacity(num.min(queue.pq.len()));
        while out.len() < num {
            let (item, _) = match queue.pq.pop() {
                Some(entry) => entry,
                None => break,
            };
            let msg = queue.messages.remove(&item.seq);
            if item.expires_at.map_or(false, |at| at <= now) {
                continue;
            }
            if let Some(msg) = msg {
                out.push(msg);
            }
        }

        if queue.is_empty() {
            self.queues.remove(queue_name);
        }
        out
    }

    fn remove_expired_messages(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for queue in self.queues.values_mut() {
            let seqs_to_remove: Vec<u64> = queue
                .pq
                .iter()
                .filter(|(item, _)| item.expires_at.map_or(false, |at| at <= now))
                .map(|(item, _)| item.seq)
                .collect();

            for seq in seqs_to_remove {
                // Eq and Hash only look at the seq.
                queue.pq.remove(&QueueItem {
                    seq,
                    expires_at: None,
                });
                queue.messages.remove(&seq);
                removed += 1;
            }
        }

        self.queues.retain(|_, q| !q.is_empty());
        removed
    }

    /// Forgets requesters whose future was dropped before a reply or timeout.
    fn prune_pending(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, tx| !tx.is_closed());
        before - self.pending.len()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single-process bus: named priority queues plus request/reply correlation.
/// Nothing is persisted.
pub struct MemoryBus {
    state: Mutex<BusState>,
    open: AtomicBool,
    retention: Option<Duration>,
}

impl MemoryBus {
    pub fn new(cfg: &Config, run_sweeper: bool) -> Arc<MemoryBus> {
        let retention = match cfg.message_retention_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let bus = Arc::new(MemoryBus {
            state: Mutex::new(BusState::default()),
            open: AtomicBool::new(true),
            retention,
        });

        if !run_sweeper {
            return bus;
        }

        let bus_background = Arc::downgrade(&bus);
        task::spawn(sweep_periodically(bus_background));

        bus
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        log::info!("messagebus opened");
    }

    /// Stops serving calls. Pending requesters are released with [`BusError::Unopened`].
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.pending.clear();
        log::info!("messagebus closed");
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub async fn remove_expired_messages(&self) -> usize {
        self.state.lock().await.remove_expired_messages()
    }

    /// Drops expired messages, empty queues and abandoned requesters.
    pub async fn sweep(&self) {
        let mut state = self.state.lock().await;
        let expired = state.remove_expired_messages();
        let abandoned = state.prune_pending();
        drop(state);

        if expired > 0 {
            log::debug!("removed {expired} expired messages");
        }
        if abandoned > 0 {
            log::debug!("forgot {abandoned} abandoned requests");
        }
    }

    fn ensure_open(&self) -> Result<&Self, BusError> {
        if self.is_open() {
            Ok(self)
        } else {
            Err(BusError::Unopened)
        }
    }
}

async fn sweep_periodically(bus: Weak<MemoryBus>) {
    loop {
        sleep(SWEEP_INTERVAL).await;

        let bus = match bus.upgrade() {
            Some(b) => b,
            None => return,
        };
        bus.sweep().await;
    }
}

impl Messagebus for MemoryBus {
    fn producer(&self) -> Result<&dyn Producer, BusError> {
        Ok(self.ensure_open()?)
    }

    fn consumer(&self) -> Result<&dyn Consumer, BusError> {
        Ok(self.ensure_open()?)
    }

    fn requester(&self) -> Result<&dyn Requester, BusError> {
        Ok(self.ensure_open()?)
    }

    fn responser(&self) -> Result<&dyn Responser, BusError> {
        Ok(self.ensure_open()?)
    }
}

#[async_trait]
impl Producer for MemoryBus {
    async fn batch_produce(&self, messages: &[Message], queue_name: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        for msg in messages {
            state.push(queue_name, msg.clone(), self.retention);
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for MemoryBus {
    async fn consume(&self, queue_name: &str, num: usize) -> Result<Vec<Message>, BusError> {
        Ok(self.state.lock().await.pull(queue_name, num))
    }
}

#[async_trait]
impl Requester for MemoryBus {
    async fn request(
        &self,
        mut message: Message,
        queue_name: &str,
        timeout_ms: u64,
    ) -> Result<Message, BusError> {
        let correlation_id = Uuid::new_v4().to_string();
        let reply_queue = format!("tmp-{correlation_id}");
        message.message_header.correlation_id = Some(correlation_id);
        message.message_header.reply_to = Some(reply_queue.clone());

        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        state.prune_pending();
        state.pending.insert(reply_queue.clone(), tx);
        state.push(queue_name, message, self.retention);
        drop(state);

        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::Unopened),
            Err(_) => {
                self.state.lock().await.pending.remove(&reply_queue);
                Err(BusError::ResponseTimeout { timeout_ms })
            }
        }
    }
}

#[async_trait]
impl Responser for MemoryBus {
    async fn response_tmp_message(&self, message: Message, queue_name: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        match state.pending.remove(queue_name) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    log::warn!("requester on {queue_name} went away before the reply arrived");
                }
            }
            None => state.push(queue_name, message, self.retention),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(retention: u64) -> Config {
        Config {
            message_retention_seconds: retention,
            ..Config::default()
        }
    }

    fn with_priority(content: &str, priority: i32) -> Message {
        let mut msg = Message::app(content);
        msg.message_header.priority = priority;
        msg
    }

    #[tokio::test]
    async fn it_pushes_and_pulls_in_priority() {
        let bus = MemoryBus::new(&config(0), false);
        let msgs = vec![
            with_priority("test1", 1),
            with_priority("test2", 1),
            with_priority("test3", 2),
        ];
        bus.producer()
            .unwrap()
            .batch_produce(&msgs, "q1")
            .await
            .unwrap();

        let pulled = bus.consumer().unwrap().consume("q1", 10).await.unwrap();
        let contents: Vec<&str> = pulled
            .iter()
            .map(|m| m.message_body.content.as_str())
            .collect();
        assert_eq!(contents, vec!["test3", "test1", "test2"]);
        assert!(pulled.iter().all(|m| m.message_header.message_id.is_some()));
    }

    #[tokio::test]
    async fn it_pulls_at_most_num() {
        let bus = MemoryBus::new(&config(0), false);
        let msgs: Vec<Message> = (0..5).map(|i| Message::app(i.to_string())).collect();
        bus.batch_produce(&msgs, "q1").await.unwrap();

        assert_eq!(bus.consume("q1", 2).await.unwrap().len(), 2);
        assert_eq!(bus.consume("q1", 10).await.unwrap().len(), 3);
        assert!(bus.consume("q1", 10).await.unwrap().is_empty());
        assert!(bus.consume("unknown", 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn it_removes_expired_messages() {
        let bus = MemoryBus::new(&config(1), false);
        bus.batch_produce(&[Message::app("old")], "q1").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        bus.batch_produce(&[Message::app("new")], "q1").await.unwrap();

        assert_eq!(bus.remove_expired_messages().await, 1);
        let pulled = bus.consume("q1", 10).await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].message_body.content, "new");
    }

    #[tokio::test]
    async fn it_correlates_request_and_response() {
        let bus = MemoryBus::new(&config(0), false);

        let requester = Arc::clone(&bus);
        let pending = tokio::spawn(async move {
            requester.request(Message::app("ping"), "rpc", 5_000).await
        });

        let request = loop {
            let mut pulled = bus.consume("rpc", 1).await.unwrap();
            if let Some(msg) = pulled.pop() {
                break msg;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(request.message_body.content, "ping");
        let reply_to = request.message_header.reply_to.clone().unwrap();

        let mut reply = Message::app("pong");
        reply.message_header.correlation_id = request.message_header.correlation_id.clone();
        bus.response_tmp_message(reply, &reply_to).await.unwrap();

        let answered = pending.await.unwrap().unwrap();
        assert_eq!(answered.message_body.content, "pong");
    }

    #[tokio::test(start_paused = true)]
    async fn it_times_out_without_a_reply() {
        let bus = MemoryBus::new(&config(0), false);
        let err = bus
            .request(Message::app("ping"), "rpc", 1_000)
            .await
            .unwrap_err();
        assert_eq!(err, BusError::ResponseTimeout { timeout_ms: 1_000 });
        assert!(bus.state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn a_closed_bus_refuses_calls() {
        let bus = MemoryBus::new(&config(0), false);
        bus.close().await;
        assert_eq!(bus.producer().err(), Some(BusError::Unopened));
        assert_eq!(bus.requester().err(), Some(BusError::Unopened));

        bus.open();
        assert!(bus.consumer().is_ok());
    }

    #[tokio::test]
    async fn an_unclaimed_response_is_queued() {
        let bus = MemoryBus::new(&config(0), false);
        bus.response_tmp_message(Message::app("late"), "replies")
            .await
            .unwrap();
        assert_eq!(bus.consume("replies", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_sharing_an_id_are_all_kept() {
        let bus = MemoryBus::new(&config(0), false);
        let mut first = Message::app("a");
        first.message_header.message_id = Some("x".to_string());
        let mut second = Message::app("b");
        second.message_header.message_id = Some("x".to_string());
        bus.batch_produce(&[first, second], "q1").await.unwrap();

        let pulled = bus.consume("q1", 10).await.unwrap();
        let contents: Vec<&str> = pulled
            .iter()
            .map(|m| m.message_body.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(pulled
            .iter()
            .all(|m| m.message_header.message_id.as_deref() == Some("x")));
    }

    #[tokio::test]
    async fn an_aborted_request_is_forgotten() {
        let bus = MemoryBus::new(&config(0), false);

        let requester = Arc::clone(&bus);
        let pending = tokio::spawn(async move {
            requester.request(Message::app("ping"), "rpc", 60_000).await
        });
        while bus.state.lock().await.pending.is_empty() {
            tokio::task::yield_now().await;
        }

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());

        bus.sweep().await;
        assert!(bus.state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn drained_queues_are_dropped() {
        let bus = MemoryBus::new(&config(0), false);
        bus.response_tmp_message(Message::app("late"), "tmp-gone")
            .await
            .unwrap();
        assert!(bus.state.lock().await.queues.contains_key("tmp-gone"));

        bus.consume("tmp-gone", 10).await.unwrap();
        assert!(bus.state.lock().await.queues.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn the_sweep_drops_queues_left_empty_by_expiry() {
        let bus = MemoryBus::new(&config(1), false);
        bus.batch_produce(&[Message::app("old")], "q1").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        bus.sweep().await;
        assert!(bus.state.lock().await.queues.is_empty());
    }
}
