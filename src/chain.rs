//! Linking stages together.
//!
//! A stage that emits items owns an [`Outlet`]; every consumer connected to
//! it receives each item by reference, in connection order. Consumers must
//! copy anything they keep past the call.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, TranscodeError};

pub trait Consumer<T>: Send {
    fn accept(&mut self, item: &T) -> Result<()>;

    /// End of input. Stages flush what they buffer, then forward the call.
    /// May be reached more than once when a stage is shared.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ordered broadcast list of downstream consumers.
pub struct Outlet<T> {
    consumers: Vec<Box<dyn Consumer<T>>>,
}

impl<T> Default for Outlet<T> {
    fn default() -> Self {
        Self {
            consumers: Vec::new(),
        }
    }
}

impl<T> Outlet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a consumer after the existing ones.
    pub fn connect(&mut self, consumer: impl Consumer<T> + 'static) {
        self.consumers.push(Box::new(consumer));
    }

    pub fn connect_boxed(&mut self, consumer: Box<dyn Consumer<T>>) {
        self.consumers.push(consumer);
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn publish(&mut self, item: &T) -> Result<()> {
        for consumer in &mut self.consumers {
            consumer.accept(item)?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        for consumer in &mut self.consumers {
            consumer.finish()?;
        }
        Ok(())
    }
}

/// A stage that emits `T`.
pub trait Producer<T> {
    fn outlet(&mut self) -> &mut Outlet<T>;

    /// Connects another consumer; earlier ones keep receiving items.
    fn connect(&mut self, consumer: impl Consumer<T> + 'static)
    where
        Self: Sized,
    {
        self.outlet().connect(consumer);
    }
}

/// Handle to a stage reachable from several chains (the muxer, usually).
pub struct Shared<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for Shared<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Shared<S> {
    pub fn new(stage: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stage)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, S>> {
        self.inner
            .lock()
            .map_err(|_| TranscodeError::invalid_state("shared stage lock poisoned"))
    }
}

impl<S, T> Consumer<T> for Shared<S>
where
    S: Consumer<T>,
{
    fn accept(&mut self, item: &T) -> Result<()> {
        self.lock()?.accept(item)
    }

    fn finish(&mut self) -> Result<()> {
        self.lock()?.finish()
    }
}

/// Adapts a closure into a consumer. Handy for taps and tests.
pub struct FnConsumer<F>(pub F);

impl<T, F> Consumer<T> for FnConsumer<F>
where
    F: FnMut(&T) -> Result<()> + Send,
{
    fn accept(&mut self, item: &T) -> Result<()> {
        (self.0)(item)
    }
}
