use crate::prelude::{DispatchError, FixRecord};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Consumer callback receiving decoded records.
pub type Consumer = Box<dyn FnMut(FixRecord) + Send>;

/// Hands decoded records to the consumer, one at a time and in decode order.
///
/// A panicking consumer is contained here so the caller's framing state is
/// never unwound through.
pub struct Dispatcher {
    consumer: Consumer,
    delivered: u64,
}

impl Dispatcher {
    pub fn new<F>(consumer: F) -> Self
    where
        F: FnMut(FixRecord) + Send + 'static,
    {
        Self {
            consumer: Box::new(consumer),
            delivered: 0,
        }
    }

    pub fn dispatch(&mut self, record: FixRecord) -> Result<(), DispatchError> {
        let consumer = &mut self.consumer;
        match panic::catch_unwind(AssertUnwindSafe(|| consumer(record))) {
            Ok(()) => {
                self.delivered += 1;
                Ok(())
            }
            Err(payload) => Err(DispatchError::ConsumerPanicked(panic_message(
                payload.as_ref(),
            ))),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
