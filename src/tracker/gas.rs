use crate::fetch::FetchRequest;
use crate::rpc::encode_quantity;
use crate::store::keys;
use crate::tracker::{Tracker, TrackerContext, TrackerError, TrackerFuture};
use serde::Deserialize;
use std::time::Duration;

pub const GAS_STATION_URL: &str = "https://ethgasstation.info/json/ethgasAPI.json";
pub const GAS_FEED_TIMEOUT: Duration = Duration::from_secs(15);

const NAME: &str = "gas";
const MAINNET_NETWORK_ID: u64 = 1;
const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Gas station report; prices are in tenths of a Gwei.
#[derive(Debug, Deserialize)]
struct GasStationReport {
    fast: f64,
    #[allow(dead_code)]
    fastest: f64,
    #[allow(dead_code)]
    average: f64,
}

/// Stores the gas price under [`keys::GAS_PRICE`].
///
/// On mainnet the gas station's `fast` price is preferred and the node's
/// suggestion is the fallback; other networks always use the node.
#[derive(Debug, Clone)]
pub struct GasTracker {
    feed_url: String,
    feed_timeout: Duration,
}

impl Default for GasTracker {
    fn default() -> Self {
        Self::new(GAS_STATION_URL)
    }
}

impl GasTracker {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            feed_timeout: GAS_FEED_TIMEOUT,
        }
    }

    pub fn with_feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout = timeout;
        self
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    async fn run(&self, ctx: &TrackerContext) -> Result<(), TrackerError> {
        let network_id = ctx.client.network_id().await.map_err(TrackerError::Rpc)?;

        let price = if network_id == MAINNET_NETWORK_ID {
            match self.feed_price(ctx).await {
                Ok(price) => price,
                Err(err) => {
                    tracing::warn!(
                        tracker = NAME,
                        url = %self.feed_url,
                        error = %err,
                        "gas feed unavailable; using node suggestion"
                    );
                    ctx.client
                        .suggest_gas_price()
                        .await
                        .map_err(TrackerError::Rpc)?
                }
            }
        } else {
            ctx.client
                .suggest_gas_price()
                .await
                .map_err(TrackerError::Rpc)?
        };

        ctx.store(keys::GAS_PRICE, encode_quantity(price).into_bytes())
            .await?;
        tracing::debug!(tracker = NAME, network_id, price, "stored gas price");
        Ok(())
    }

    async fn feed_price(&self, ctx: &TrackerContext) -> Result<u128, TrackerError> {
        let request = FetchRequest::new(self.feed_url.clone(), self.feed_timeout);
        let body = ctx
            .fetcher
            .fetch(&request)
            .await
            .map_err(TrackerError::Fetch)?;
        decode_gas_report(&body)
    }
}

impl Tracker for GasTracker {
    fn name(&self) -> &str {
        NAME
    }

    fn exec<'a>(&'a self, ctx: &'a TrackerContext) -> TrackerFuture<'a> {
        Box::pin(self.run(ctx))
    }
}

/// Converts a gas station report to wei: whole Gwei of `fast / 10`, times 10^9.
fn decode_gas_report(body: &[u8]) -> Result<u128, TrackerError> {
    let report: GasStationReport =
        serde_json::from_slice(body).map_err(|err| TrackerError::Decode {
            tracker: NAME.to_owned(),
            reason: err.to_string(),
        })?;

    let gwei = (report.fast / 10.0).trunc();
    if !gwei.is_finite() || gwei < 0.0 {
        return Err(TrackerError::Decode {
            tracker: NAME.to_owned(),
            reason: format!("fast price {} is out of range", report.fast),
        });
    }
    Ok(gwei as u128 * WEI_PER_GWEI)
}
