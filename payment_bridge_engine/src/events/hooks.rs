use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, PaymentSucceededEvent, RefundSucceededEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_succeeded_producer: Vec<EventProducer<PaymentSucceededEvent>>,
    pub refund_succeeded_producer: Vec<EventProducer<RefundSucceededEvent>>,
}

pub struct EventHandlers {
    pub on_payment_succeeded: Option<EventHandler<PaymentSucceededEvent>>,
    pub on_refund_succeeded: Option<EventHandler<RefundSucceededEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_succeeded = hooks.on_payment_succeeded.map(|f| EventHandler::new(buffer_size, f));
        let on_refund_succeeded = hooks.on_refund_succeeded.map(|f| EventHandler::new(buffer_size, f));
        Self { on_payment_succeeded, on_refund_succeeded }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_succeeded {
            result.payment_succeeded_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_refund_succeeded {
            result.refund_succeeded_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_succeeded {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_refund_succeeded {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_succeeded: Option<Handler<PaymentSucceededEvent>>,
    pub on_refund_succeeded: Option<Handler<RefundSucceededEvent>>,
}

impl EventHooks {
    pub fn on_payment_succeeded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentSucceededEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_succeeded = Some(Arc::new(f));
        self
    }

    pub fn on_refund_succeeded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RefundSucceededEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_refund_succeeded = Some(Arc::new(f));
        self
    }
}
