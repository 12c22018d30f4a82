//! Caller-supplied decoder settings. Addresses stay strings until
//! [`DecoderSettings::resolve`] parses them for a concrete chain.

use std::collections::HashMap;

use crate::chain::Chain;
use crate::error::Error;
use crate::types::Asset;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    pub tracked_accounts: Vec<String>,
    /// Address to exchange name, e.g. a hot wallet of a centralized venue.
    pub exchange_addresses: HashMap<String, String>,
    pub tokens: Vec<TokenSettings>,
    pub amm: Option<AmmSettings>,
    pub aggregator_router: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TokenSettings {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    /// Defaults to the address.
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct AmmSettings {
    pub factory: Option<String>,
    /// Pools known up front. The rest is discovered through the factory.
    pub pools: Vec<PoolSettings>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PoolSettings {
    pub address: String,
    pub token0: String,
    pub token1: String,
}

/// [`DecoderSettings`] with every address parsed for chain `C`.
#[derive(Debug, Clone)]
pub struct ResolvedSettings<C: Chain> {
    pub tracked_accounts: Vec<C::Address>,
    pub exchange_addresses: HashMap<C::Address, String>,
    pub tokens: HashMap<C::Address, Asset>,
    pub amm: Option<ResolvedAmm<C>>,
    pub aggregator_router: Option<C::Address>,
}

#[derive(Debug, Clone)]
pub struct ResolvedAmm<C: Chain> {
    pub factory: Option<C::Address>,
    /// Pool address to `(token0, token1)`.
    pub pools: HashMap<C::Address, (C::Address, C::Address)>,
}

impl DecoderSettings {
    pub fn from_json(data: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn resolve<C: Chain>(&self) -> Result<ResolvedSettings<C>, Error> {
        let tracked_accounts = self
            .tracked_accounts
            .iter()
            .map(|address| C::parse_address(address))
            .collect::<Result<Vec<_>, _>>()?;

        let mut exchange_addresses = HashMap::with_capacity(self.exchange_addresses.len());
        for (address, name) in &self.exchange_addresses {
            exchange_addresses.insert(C::parse_address(address)?, name.clone());
        }

        let mut tokens = HashMap::with_capacity(self.tokens.len());
        for token in &self.tokens {
            let identifier = token
                .identifier
                .clone()
                .unwrap_or_else(|| token.address.clone());
            let asset = Asset::new(identifier, token.symbol.clone(), token.decimals);
            if tokens.insert(C::parse_address(&token.address)?, asset).is_some() {
                return Err(Error::parse(format!("token {} listed twice", token.address)));
            }
        }

        let amm = self.amm.as_ref().map(AmmSettings::resolve::<C>).transpose()?;
        let aggregator_router = self
            .aggregator_router
            .as_deref()
            .map(C::parse_address)
            .transpose()?;

        Ok(ResolvedSettings {
            tracked_accounts,
            exchange_addresses,
            tokens,
            amm,
            aggregator_router,
        })
    }
}

impl AmmSettings {
    fn resolve<C: Chain>(&self) -> Result<ResolvedAmm<C>, Error> {
        let factory = self.factory.as_deref().map(C::parse_address).transpose()?;
        let mut pools = HashMap::with_capacity(self.pools.len());
        for pool in &self.pools {
            pools.insert(
                C::parse_address(&pool.address)?,
                (C::parse_address(&pool.token0)?, C::parse_address(&pool.token1)?),
            );
        }
        Ok(ResolvedAmm { factory, pools })
    }
}
