//! Consumer callback trait for registry data changes

use crate::info::RegistryData;

/// Receives data for a subscribed key.
///
/// Invoked zero or more times after subscribe, on whichever thread the
/// backend delivers its change events, until the consumer is unsubscribed.
pub trait RegistryConsumer: Send + Sync + 'static {
    fn data(&self, data: &RegistryData);
}

/// A consumer that invokes a closure.
pub struct FnConsumer<F>
where
    F: Fn(&RegistryData) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnConsumer<F>
where
    F: Fn(&RegistryData) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> RegistryConsumer for FnConsumer<F>
where
    F: Fn(&RegistryData) + Send + Sync + 'static,
{
    fn data(&self, data: &RegistryData) {
        (self.f)(data);
    }
}
