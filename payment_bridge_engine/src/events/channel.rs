//! The mpsc plumbing under the payment event hooks.
//!
//! Each event type (payment settled, refund settled, ...) gets one [`EventHandler`] owning the
//! receiving half of a bounded channel, and any number of cloned [`EventProducer`]s feeding it.
//! The channel is bounded on purpose: a burst of gateway callbacks exerts backpressure on the
//! publishing side instead of growing an unbounded queue while a slow hook catches up.
//!
//! Handlers are stateless. They see the event payload and nothing else, so a hook cannot reach
//! back into order storage and create ordering hazards with the flow that published the event.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        Self { listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs the dispatch loop until every producer has been dropped, then drains the hook tasks
    /// that are still in flight before returning.
    pub async fn start_handler(mut self) {
        debug!("📬️ Event handler listening");
        // Our own sender copy must go, or the recv loop below never terminates.
        drop(self.sender);
        let in_flight = Arc::new(AtomicI64::new(0));
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Dispatching event to hook");
            let handler = Arc::clone(&self.handler);
            in_flight.fetch_add(1, Ordering::SeqCst);
            let counter = in_flight.clone();
            tokio::spawn(async move {
                (handler)(ev).await;
                counter.fetch_sub(1, Ordering::Relaxed);
                trace!("📬️ Hook completed");
            });
        }
        // The flows are gone; settle whatever hooks are still running.
        while in_flight.load(Ordering::SeqCst) > 0 {
            debug!("📬️ Waiting for {} in-flight hooks before shutting down", in_flight.load(Ordering::SeqCst));
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        }
        debug!("📬️ Event handler has shut down");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}
