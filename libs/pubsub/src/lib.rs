//! # Fastlane Pub/Sub Batcher
//!
//! ## Purpose
//!
//! Size-and-time batched forwarding of binary messages to a Redis pub/sub
//! channel. A single producer submits messages into a bounded channel; a
//! background task accumulates them and publishes one batch whenever the
//! batch fills or the batch duration elapses.
//!
//! ## Guarantees
//!
//! * Messages are never dropped in memory: publish failures retry with
//!   exponential backoff, and a full input channel blocks the submitter,
//!   so back-pressure propagates to the caller.
//! * Per producer, messages are published in submission order.
//! * Shutdown drains the buffer once.
//!
//! ## Observability
//!
//! Counters `pubsub_submitted_total` and `pubsub_flushed_total`, and the
//! gauge `pubsub_queued` (input channel depth).

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PubsubError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("pubsub producer is shut down")]
    Closed,
}

pub type PubsubResult<T> = Result<T, PubsubError>;

/// Producer configuration. Every field is required.
#[derive(Debug, Clone)]
pub struct PubsubConfig {
    pub redis_hostname: String,
    pub pubsub_channel_name: String,
    pub batch_size: usize,
    pub batch_duration: Duration,
    pub message_channel_size: usize,
}

/// Where batches go. Production uses Redis; tests substitute a capture sink.
#[async_trait]
pub trait BatchSink: Send + 'static {
    async fn publish(&mut self, payload: Vec<u8>) -> PubsubResult<()>;
}

struct RedisSink {
    connection: redis::aio::ConnectionManager,
    channel: String,
}

#[async_trait]
impl BatchSink for RedisSink {
    async fn publish(&mut self, payload: Vec<u8>) -> PubsubResult<()> {
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<_, ()>(&mut self.connection)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct PubsubCounters {
    pub submitted: AtomicU64,
    pub flushed: AtomicU64,
}

/// Single-producer batched forwarder.
pub struct PubsubProducer {
    sender: mpsc::Sender<Vec<u8>>,
    counters: Arc<PubsubCounters>,
    task: JoinHandle<()>,
}

impl PubsubProducer {
    /// Connect to Redis and start the batching task.
    pub async fn create(config: PubsubConfig) -> PubsubResult<Self> {
        let client = redis::Client::open(format!("redis://{}/", config.redis_hostname))?;
        let connection = client.get_connection_manager().await?;
        let sink = RedisSink {
            connection,
            channel: config.pubsub_channel_name.clone(),
        };
        Ok(Self::with_sink(config, sink))
    }

    /// Start the batching task over an arbitrary sink.
    pub fn with_sink<S: BatchSink>(config: PubsubConfig, sink: S) -> Self {
        let (sender, receiver) = mpsc::channel(config.message_channel_size.max(1));
        let counters = Arc::new(PubsubCounters::default());
        let task = tokio::spawn(run_batcher(config, receiver, sink, counters.clone()));
        Self {
            sender,
            counters,
            task,
        }
    }

    /// Submit one message. Blocks when the channel is full.
    pub async fn submit(&self, message: Vec<u8>) -> PubsubResult<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| PubsubError::Closed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pubsub_submitted_total").increment(1);
        metrics::gauge!("pubsub_queued").set(self.queued() as f64);
        Ok(())
    }

    /// Messages waiting in the input channel.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn counters(&self) -> &PubsubCounters {
        &self.counters
    }

    /// Stop accepting input, drain the buffer once, and wait for the task.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.task.await;
    }
}

async fn run_batcher<S: BatchSink>(
    config: PubsubConfig,
    mut receiver: mpsc::Receiver<Vec<u8>>,
    mut sink: S,
    counters: Arc<PubsubCounters>,
) {
    let mut buffer: Vec<Vec<u8>> = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.batch_duration);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = receiver.recv() => {
                match message {
                    Some(message) => {
                        buffer.push(message);
                        if buffer.len() >= config.batch_size {
                            flush(&mut sink, &mut buffer, &counters).await;
                            ticker.reset();
                        }
                    }
                    None => {
                        // Producer dropped: drain once and stop.
                        flush(&mut sink, &mut buffer, &counters).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&mut sink, &mut buffer, &counters).await;
            }
        }
    }
}

/// Publish the buffer as one batch. Retries forever with exponential
/// backoff; the buffer is only cleared after a successful publish.
async fn flush<S: BatchSink>(sink: &mut S, buffer: &mut Vec<Vec<u8>>, counters: &PubsubCounters) {
    if buffer.is_empty() {
        return;
    }

    let payload = frame_batch(buffer);
    let message_count = buffer.len() as u64;

    let mut backoff = Duration::from_millis(100);
    loop {
        match sink.publish(payload.clone()).await {
            Ok(()) => break,
            Err(e) => {
                warn!("pubsub publish failed, retrying in {backoff:?}: {e}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
        }
    }

    debug!(messages = message_count, bytes = payload.len(), "published batch");
    counters.flushed.fetch_add(message_count, Ordering::Relaxed);
    metrics::counter!("pubsub_flushed_total").increment(message_count);
    buffer.clear();
}

/// Batch frame: `u32` message count, then `u32` length + bytes per message.
/// Little-endian throughout.
pub fn frame_batch(messages: &[Vec<u8>]) -> Vec<u8> {
    let size = 4 + messages.iter().map(|m| 4 + m.len()).sum::<usize>();
    let mut payload = Vec::with_capacity(size);
    payload.extend_from_slice(&(messages.len() as u32).to_le_bytes());
    for message in messages {
        payload.extend_from_slice(&(message.len() as u32).to_le_bytes());
        payload.extend_from_slice(message);
    }
    payload
}

/// Inverse of [`frame_batch`]. `None` on a malformed frame.
pub fn unframe_batch(payload: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut offset = 0usize;
    let count = u32::from_le_bytes(payload.get(0..4)?.try_into().ok()?) as usize;
    offset += 4;
    let mut messages = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let len =
            u32::from_le_bytes(payload.get(offset..offset + 4)?.try_into().ok()?) as usize;
        offset += 4;
        messages.push(payload.get(offset..offset + len)?.to_vec());
        offset += len;
    }
    if offset != payload.len() {
        return None;
    }
    Some(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct CaptureSink {
        batches: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_first: Arc<AtomicU64>,
    }

    #[async_trait]
    impl BatchSink for CaptureSink {
        async fn publish(&mut self, payload: Vec<u8>) -> PubsubResult<()> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(PubsubError::Closed);
            }
            self.batches.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn config(batch_size: usize, batch_duration: Duration) -> PubsubConfig {
        PubsubConfig {
            redis_hostname: "127.0.0.1:6379".into(),
            pubsub_channel_name: "relay_updates".into(),
            batch_size,
            batch_duration,
            message_channel_size: 64,
        }
    }

    #[tokio::test]
    async fn flushes_when_the_batch_fills() {
        let sink = CaptureSink::default();
        let batches = sink.batches.clone();
        let producer = PubsubProducer::with_sink(config(3, Duration::from_secs(3600)), sink);

        for i in 0..3u8 {
            producer.submit(vec![i]).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !batches.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let captured = batches.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(
            unframe_batch(&captured[0]).unwrap(),
            vec![vec![0u8], vec![1], vec![2]]
        );
        producer.shutdown().await;
    }

    #[tokio::test]
    async fn flushes_on_the_timer() {
        let sink = CaptureSink::default();
        let batches = sink.batches.clone();
        let producer = PubsubProducer::with_sink(config(1000, Duration::from_millis(50)), sink);

        producer.submit(b"only one".to_vec()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !batches.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            unframe_batch(&batches.lock().unwrap()[0]).unwrap(),
            vec![b"only one".to_vec()]
        );
        producer.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_the_buffer() {
        let sink = CaptureSink::default();
        let batches = sink.batches.clone();
        let producer = PubsubProducer::with_sink(config(1000, Duration::from_secs(3600)), sink);

        producer.submit(b"pending".to_vec()).await.unwrap();
        assert_eq!(producer.counters().submitted.load(Ordering::Relaxed), 1);
        producer.shutdown().await;

        assert_eq!(
            unframe_batch(&batches.lock().unwrap()[0]).unwrap(),
            vec![b"pending".to_vec()]
        );
    }

    #[tokio::test]
    async fn publish_failure_retries_without_dropping() {
        let sink = CaptureSink::default();
        sink.fail_first.store(2, Ordering::SeqCst);
        let batches = sink.batches.clone();
        let producer = PubsubProducer::with_sink(config(1, Duration::from_secs(3600)), sink);

        producer.submit(b"precious".to_vec()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !batches.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            unframe_batch(&batches.lock().unwrap()[0]).unwrap(),
            vec![b"precious".to_vec()]
        );
        producer.shutdown().await;
    }

    #[test]
    fn frame_round_trip() {
        let messages = vec![b"a".to_vec(), b"bb".to_vec(), Vec::new()];
        assert_eq!(unframe_batch(&frame_batch(&messages)).unwrap(), messages);
        assert!(unframe_batch(&[1, 0]).is_none());
    }
}
