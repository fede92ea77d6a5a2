//! Request intake between the transport and the [`Dispatcher`].
//!
//! File mutations (`set`, `add`, `delete`, `write`) go through one queue
//! with a single consumer, so they apply in the order they arrived. Reads
//! and `execute` run on their own tasks and never wait behind a mutation.
//! Every reply, in completion order, comes out of the delivery channel.

use std::sync::Arc;

use tokio::sync::mpsc;

use environ_common::{Metadata, Operation, Reply, operation_name};

use crate::dispatcher::Dispatcher;
use crate::exec::{CommandRunner, ShellRunner};
use crate::fs::{FileSystem, TokioFs};

/// One decoded bus message.
#[derive(Debug, Clone)]
pub struct Request {
    pub meta: Metadata,
    pub payload: serde_json::Value,
}

/// A finished request, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub meta: Metadata,
    pub reply: Reply,
}

/// Intake handle. Cloning shares the same mutation queue.
#[derive(Debug)]
pub struct Inbox<F = TokioFs, R = ShellRunner> {
    dispatcher: Arc<Dispatcher<F, R>>,
    writes: mpsc::UnboundedSender<Request>,
    replies: mpsc::UnboundedSender<Delivery>,
}

impl<F, R> Clone for Inbox<F, R> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            writes: self.writes.clone(),
            replies: self.replies.clone(),
        }
    }
}

impl<F, R> Inbox<F, R>
where
    F: FileSystem + 'static,
    R: CommandRunner + 'static,
{
    /// Spawn the mutation worker. Must be called inside a tokio runtime.
    ///
    /// The worker stops once every `Inbox` clone is dropped and the queue
    /// is drained.
    pub fn start(dispatcher: Arc<Dispatcher<F, R>>) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (writes, queue) = mpsc::unbounded_channel();
        let (replies, deliveries) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(
            Arc::clone(&dispatcher),
            queue,
            replies.clone(),
        ));
        let inbox = Self {
            dispatcher,
            writes,
            replies,
        };
        (inbox, deliveries)
    }

    /// Hand a request over without waiting for it to run.
    pub fn submit(&self, request: Request) {
        let mutates = operation_name(&request.meta.event)
            .parse::<Operation>()
            .is_ok_and(Operation::mutates_file);
        if mutates {
            if let Err(e) = self.writes.send(request) {
                tracing::error!(event = %e.0.meta.event, "mutation queue closed; request dropped");
            }
        } else {
            tokio::spawn(serve(
                Arc::clone(&self.dispatcher),
                request,
                self.replies.clone(),
            ));
        }
    }
}

async fn write_loop<F, R>(
    dispatcher: Arc<Dispatcher<F, R>>,
    mut queue: mpsc::UnboundedReceiver<Request>,
    replies: mpsc::UnboundedSender<Delivery>,
) where
    F: FileSystem,
    R: CommandRunner,
{
    while let Some(request) = queue.recv().await {
        serve(Arc::clone(&dispatcher), request, replies.clone()).await;
    }
    tracing::debug!("mutation queue drained");
}

async fn serve<F, R>(
    dispatcher: Arc<Dispatcher<F, R>>,
    request: Request,
    replies: mpsc::UnboundedSender<Delivery>,
) where
    F: FileSystem,
    R: CommandRunner,
{
    let Request { meta, payload } = request;
    let mut reply = None;
    dispatcher
        .handle(payload, &meta, |result| reply = Some(result))
        .await;
    let Some(reply) = reply else {
        return;
    };
    if replies.send(Delivery { meta, reply }).is_err() {
        tracing::debug!("delivery channel closed; reply dropped");
    }
}
