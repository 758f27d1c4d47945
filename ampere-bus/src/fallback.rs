use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{BusError, HttpError};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("{0}")]
    Unavailable(String),
}

/// One way of getting `T` to the other side.
#[async_trait]
pub trait Delivery<T: ?Sized + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, item: &T) -> Result<(), DeliveryError>;
}

#[derive(Debug, Error)]
#[error("all {} delivery strategies failed", .attempts.len())]
pub struct FallbackError {
    pub attempts: Vec<(&'static str, DeliveryError)>,
}

/// Tries each strategy in order and stops at the first success.
pub struct Fallback<T: ?Sized + Sync> {
    strategies: Vec<Arc<dyn Delivery<T>>>,
}

impl<T: ?Sized + Sync> Fallback<T> {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn then<D>(mut self, strategy: D) -> Self
    where
        D: Delivery<T> + 'static,
    {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Returns the name of the strategy that delivered the item.
    pub async fn deliver(&self, item: &T) -> Result<&'static str, FallbackError> {
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            match strategy.deliver(item).await {
                Ok(()) => {
                    debug!(via = strategy.name(), "Delivered");
                    return Ok(strategy.name());
                }
                Err(e) => {
                    warn!(via = strategy.name(), error = %e, "Delivery attempt failed");
                    attempts.push((strategy.name(), e));
                }
            }
        }

        Err(FallbackError { attempts })
    }
}

impl<T: ?Sized + Sync> Default for Fallback<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Sync> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
        }
    }
}
