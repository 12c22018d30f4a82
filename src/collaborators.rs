//! Services the decoder consumes but does not own: on-chain reads, token
//! metadata and user-facing notifications.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::chain::Chain;
use crate::error::Error;
use crate::types::Asset;

/// Read-only contract calls used by decoders that refresh their caches.
pub trait NodeInquirer<C: Chain>: Send + Sync {
    /// Executes a call against `address` with raw calldata and returns the
    /// raw return data.
    fn call(&self, address: &C::Address, calldata: &[u8]) -> Result<Vec<u8>, Error>;
}

pub trait AssetResolver<C: Chain>: Send + Sync {
    fn resolve_token(&self, address: &C::Address) -> Result<Asset, Error>;
}

pub trait MessageAggregator: Send + Sync {
    /// Something the user should see about a decoded transaction.
    fn notify_user(&self, message: &str, counterparty: &str);

    /// A failure the user should see. Details live in the logs.
    fn add_error(&self, message: &str);
}

/// Forwards every message to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMessageAggregator;

impl MessageAggregator for LoggingMessageAggregator {
    fn notify_user(&self, message: &str, counterparty: &str) {
        tracing::warn!(counterparty, "{message}");
    }

    fn add_error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Keeps messages in memory so callers can drain and surface them.
#[derive(Debug, Default)]
pub struct CollectingMessageAggregator {
    notifications: Mutex<Vec<(String, String)>>,
    errors: Mutex<Vec<String>>,
}

impl CollectingMessageAggregator {
    /// Drained `(message, counterparty)` pairs.
    pub fn take_notifications(&self) -> Vec<(String, String)> {
        std::mem::take(
            &mut *self
                .notifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MessageAggregator for CollectingMessageAggregator {
    fn notify_user(&self, message: &str, counterparty: &str) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message.to_owned(), counterparty.to_owned()));
    }

    fn add_error(&self, message: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_owned());
    }
}

/// Token metadata from a fixed table, e.g. one loaded from settings.
pub struct StaticAssetResolver<C: Chain> {
    assets: HashMap<C::Address, Asset>,
}

impl<C: Chain> Default for StaticAssetResolver<C> {
    fn default() -> Self {
        Self {
            assets: HashMap::new(),
        }
    }
}

impl<C: Chain> StaticAssetResolver<C> {
    pub fn new(assets: HashMap<C::Address, Asset>) -> Self {
        Self { assets }
    }

    pub fn with_asset(mut self, address: C::Address, asset: Asset) -> Self {
        self.assets.insert(address, asset);
        self
    }
}

impl<C: Chain> AssetResolver<C> for StaticAssetResolver<C> {
    fn resolve_token(&self, address: &C::Address) -> Result<Asset, Error> {
        self.assets
            .get(address)
            .cloned()
            .ok_or_else(|| Error::remote(format!("unknown token {address}")))
    }
}

/// Inquirer for setups without node access. Every call fails with a
/// recoverable error.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableNodeInquirer;

impl<C: Chain> NodeInquirer<C> for UnavailableNodeInquirer {
    fn call(&self, address: &C::Address, _calldata: &[u8]) -> Result<Vec<u8>, Error> {
        Err(Error::remote(format!("no node available to query {address}")))
    }
}
