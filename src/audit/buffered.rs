//! Batching backend: a bounded queue drained by one background task.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use super::{handle_plugin_error, AuditError, Backend, Event};
use crate::config::schema::BatchConfig;
use crate::lifecycle::Signal;
use crate::observability::metrics;
use crate::resilience::TokenBucket;

const PLUGIN_NAME: &str = "buffered";

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub buffer_size: usize,
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
    /// Batches per second and burst, when throttled.
    pub throttle: Option<(f64, u32)>,
    pub async_delegate: bool,
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            max_batch_size: config.max_batch_size.max(1),
            max_batch_wait: config.max_batch_wait(),
            throttle: config
                .throttle_enabled
                .then_some((config.throttle_qps, config.throttle_burst)),
            async_delegate: config.async_delegate,
        }
    }
}

struct Worker {
    rx: mpsc::Receiver<Arc<Event>>,
    in_flight: JoinSet<()>,
}

#[derive(Clone)]
struct Dispatcher {
    delegate: Arc<dyn Backend>,
    throttle: Option<Arc<TokenBucket>>,
    async_delegate: bool,
    name: String,
}

impl Dispatcher {
    async fn dispatch(&self, batch: Vec<Arc<Event>>, in_flight: &mut JoinSet<()>) {
        if batch.is_empty() {
            return;
        }
        if let Some(throttle) = &self.throttle {
            throttle.acquire().await;
        }
        metrics::record_audit_batch(&self.name);

        if self.async_delegate {
            let delegate = Arc::clone(&self.delegate);
            in_flight.spawn(async move { deliver(delegate.as_ref(), &batch).await });
            while in_flight.try_join_next().is_some() {}
        } else {
            deliver(self.delegate.as_ref(), &batch).await;
        }
    }
}

async fn deliver(delegate: &dyn Backend, batch: &[Arc<Event>]) {
    if let Err(e) = delegate.process_events(batch).await {
        handle_plugin_error(&delegate.name(), &e, batch);
    }
}

/// Pull up to `max` events. The wait starts with the first event; `stop`
/// ends collection early.
async fn collect(
    rx: &mut mpsc::Receiver<Arc<Event>>,
    max: usize,
    max_wait: Duration,
    stop: Option<&Signal>,
) -> Vec<Arc<Event>> {
    let mut batch = Vec::new();
    let mut deadline: Option<Instant> = None;

    while batch.len() < max {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let stopped = async {
            match stop {
                Some(signal) => signal.signaled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + max_wait);
                    }
                    batch.push(event);
                }
                None => break,
            },
            _ = timer => break,
            _ = stopped => break,
        }
    }
    batch
}

/// Queues events and hands them to the delegate in batches.
pub struct BufferedBackend {
    settings: BatchSettings,
    dispatcher: Dispatcher,
    tx: mpsc::Sender<Arc<Event>>,
    rx: Mutex<Option<mpsc::Receiver<Arc<Event>>>>,
    worker: Mutex<Option<JoinHandle<Worker>>>,
}

impl BufferedBackend {
    pub fn new(delegate: Arc<dyn Backend>, settings: BatchSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.buffer_size.max(1));
        let throttle = settings
            .throttle
            .map(|(qps, burst)| Arc::new(TokenBucket::new(qps, burst)));
        let name = delegate.name();
        Self {
            dispatcher: Dispatcher {
                delegate,
                throttle,
                async_delegate: settings.async_delegate,
                name,
            },
            settings,
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    fn drop_events(&self, reason: &str, events: &[Arc<Event>]) {
        metrics::record_audit_dropped(&self.dispatcher.name, events.len());
        handle_plugin_error(PLUGIN_NAME, &AuditError::Buffer(reason.to_string()), events);
    }
}

#[async_trait]
impl Backend for BufferedBackend {
    /// Never blocks: events that do not fit are dropped.
    async fn process_events(&self, events: &[Arc<Event>]) -> Result<(), AuditError> {
        for (i, event) in events.iter().enumerate() {
            match self.tx.try_send(Arc::clone(event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.drop_events("audit buffer queue blocked", &events[i..]);
                    return Ok(());
                }
                Err(TrySendError::Closed(_)) => {
                    self.drop_events("audit backend shut down", &events[i..]);
                    return Ok(());
                }
            }
        }
        metrics::record_audit_events(&self.dispatcher.name, events.len());
        Ok(())
    }

    fn run(&self, stop: Signal) -> Result<(), AuditError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AuditError::AlreadyRunning(self.name()))?;
        self.dispatcher.delegate.run(stop.clone())?;

        let dispatcher = self.dispatcher.clone();
        let max = self.settings.max_batch_size;
        let max_wait = self.settings.max_batch_wait;
        let handle = tokio::spawn(async move {
            let mut rx = rx;
            let mut in_flight = JoinSet::new();
            loop {
                let batch = collect(&mut rx, max, max_wait, Some(&stop)).await;
                dispatcher.dispatch(batch, &mut in_flight).await;
                if stop.is_signaled() {
                    break;
                }
            }
            Worker { rx, in_flight }
        });

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(backend = %self.name(), "Audit batching started");
        Ok(())
    }

    /// Waits for the batching task to stop, then flushes what is queued.
    async fn shutdown(&self) {
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let worker = match handle {
            Some(handle) => match handle.await {
                Ok(worker) => Some(worker),
                Err(e) => {
                    tracing::error!(error = %e, "Audit batching task failed");
                    None
                }
            },
            None => self
                .rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .map(|rx| Worker {
                    rx,
                    in_flight: JoinSet::new(),
                }),
        };

        if let Some(Worker { mut rx, mut in_flight }) = worker {
            rx.close();
            loop {
                let batch = collect(&mut rx, self.settings.max_batch_size, Duration::ZERO, None).await;
                if batch.is_empty() {
                    break;
                }
                self.dispatcher.dispatch(batch, &mut in_flight).await;
            }
            while in_flight.join_next().await.is_some() {}
        }

        self.dispatcher.delegate.shutdown().await;
        tracing::info!(backend = %self.name(), "Audit batching stopped");
    }

    fn name(&self) -> String {
        format!("{PLUGIN_NAME}<{}>", self.dispatcher.name)
    }
}
