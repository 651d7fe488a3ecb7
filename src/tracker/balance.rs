use crate::rpc::{encode_quantity, normalize_address};
use crate::store::keys;
use crate::tracker::{Tracker, TrackerContext, TrackerError, TrackerFuture};
use anyhow::Result;

/// Stores the ETH balance of the node's public address under [`keys::BALANCE`].
#[derive(Debug, Clone)]
pub struct BalanceTracker {
    address: String,
}

const NAME: &str = "balance";

impl BalanceTracker {
    pub fn new(address: &str) -> Result<Self> {
        Ok(Self {
            address: normalize_address(address)?,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn run(&self, ctx: &TrackerContext) -> Result<(), TrackerError> {
        let balance = ctx
            .client
            .balance_at(&self.address)
            .await
            .map_err(TrackerError::Rpc)?;
        ctx.store(keys::BALANCE, encode_quantity(balance).into_bytes())
            .await?;
        tracing::debug!(tracker = NAME, address = %self.address, balance, "stored balance");
        Ok(())
    }
}

impl Tracker for BalanceTracker {
    fn name(&self) -> &str {
        NAME
    }

    fn exec<'a>(&'a self, ctx: &'a TrackerContext) -> TrackerFuture<'a> {
        Box::pin(self.run(ctx))
    }
}
