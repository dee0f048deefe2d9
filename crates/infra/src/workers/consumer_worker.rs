use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tyrehub_events::{BusError, Delivery, MessageBus, Subscription};

use crate::consumers::MessageHandler;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A message already being handled runs to completion (and is acked)
    /// first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(worker = self.name, error = %e, "consumer worker panicked");
        }
    }
}

/// Generic consumer worker loop.
///
/// - Consumes from the handler's queue, one delivery at a time
/// - Runs the handler to completion, then acks, whether it succeeded or not
/// - Supports graceful shutdown between messages
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Declare the handler's queue, start consuming, and spawn the loop.
    ///
    /// The queue exists by the time this returns, so anything published
    /// afterwards is delivered.
    pub async fn spawn<H>(bus: Arc<dyn MessageBus>, handler: H) -> Result<WorkerHandle, BusError>
    where
        H: MessageHandler + 'static,
    {
        let name = handler.name();
        let subscription = bus.consume(handler.binding()).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(worker = name, queue = subscription.queue(), "consumer worker started");
        let join = tokio::spawn(worker_loop(name, bus, subscription, handler, shutdown_rx));

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join,
        })
    }
}

async fn worker_loop<H>(
    name: &'static str,
    bus: Arc<dyn MessageBus>,
    mut subscription: Subscription,
    handler: H,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    H: MessageHandler,
{
    loop {
        // Only the wait is cancellable; a received delivery is always finished.
        let delivery = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            next = subscription.recv() => match next {
                Some(delivery) => delivery,
                None => {
                    warn!(worker = name, "subscription closed");
                    break;
                }
            },
        };

        process(name, bus.as_ref(), &handler, &delivery).await;
    }
    info!(worker = name, "consumer worker stopped");
}

async fn process<H>(name: &'static str, bus: &dyn MessageBus, handler: &H, delivery: &Delivery)
where
    H: MessageHandler,
{
    debug!(
        worker = name,
        routing_key = %delivery.routing_key,
        redelivered = delivery.redelivered,
        "delivery received"
    );

    if let Err(err) = handler.handle(delivery).await {
        warn!(worker = name, error = %err, "consumer handler failed");
    }

    if let Err(err) = bus.ack(delivery).await {
        warn!(worker = name, error = %err, "ack failed; message may be redelivered");
    }
}
