use crate::rpc::parse_quantity;
use crate::store::{get_if_present, keys, DataProxy, StoreError};
use anyhow::Context;

/// Everything a submitter needs for one round, read from the store in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSnapshot {
    pub challenge: String,
    pub request_id: u128,
    pub difficulty: u128,
    pub query_string: String,
    pub granularity: u128,
    pub total_tip: u128,
    /// Latest gas price in wei, if a gas tracker has written one.
    pub gas_price: Option<u128>,
}

impl WorkSnapshot {
    /// Reads the challenge keys through `proxy`.
    ///
    /// Returns `Ok(None)` while any challenge key is still missing, which is the
    /// normal state before the first tracker cycle. The challenge is read again
    /// after the other keys; if a tracker replaced it in between, the values
    /// may belong to two challenges and `Ok(None)` is returned so the caller
    /// retries on its next tick.
    pub async fn read(proxy: &dyn DataProxy) -> Result<Option<Self>, StoreError> {
        let mut values = Vec::with_capacity(keys::CHALLENGE_KEYS.len());
        for key in keys::CHALLENGE_KEYS {
            match get_if_present(proxy, key).await? {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }

        let settled = get_if_present(proxy, keys::CURRENT_CHALLENGE).await?;
        if settled.as_deref() != Some(values[0].as_slice()) {
            tracing::debug!("challenge changed while reading work, retrying later");
            return Ok(None);
        }

        let text = |idx: usize| String::from_utf8_lossy(&values[idx]).into_owned();
        let gas_price = match get_if_present(proxy, keys::GAS_PRICE).await? {
            Some(raw) => Some(decode_quantity(keys::GAS_PRICE, &raw)?),
            None => None,
        };

        Ok(Some(Self {
            challenge: text(0),
            request_id: decode_quantity(keys::REQUEST_ID, &values[1])?,
            difficulty: decode_quantity(keys::DIFFICULTY, &values[2])?,
            query_string: text(3),
            granularity: decode_quantity(keys::GRANULARITY, &values[4])?,
            total_tip: decode_quantity(keys::TOTAL_TIP, &values[5])?,
            gas_price,
        }))
    }
}

fn decode_quantity(key: &str, raw: &[u8]) -> Result<u128, StoreError> {
    std::str::from_utf8(raw)
        .context("value is not utf-8")
        .and_then(parse_quantity)
        .map_err(|err| StoreError::Backend {
            reason: format!("stored {key} is malformed: {err:#}"),
        })
}
