use crate::rpc::{encode_quantity, CurrentChallenge};
use crate::store::keys;
use crate::tracker::{Tracker, TrackerContext, TrackerError, TrackerFuture};

/// Copies the oracle contract's current challenge into the store so the miner
/// can build work from it.
#[derive(Debug, Clone, Default)]
pub struct CurrentVariablesTracker;

const NAME: &str = "current_variables";

impl CurrentVariablesTracker {
    async fn run(&self, ctx: &TrackerContext) -> Result<(), TrackerError> {
        let Some(contract) = &ctx.contract else {
            tracing::debug!(
                tracker = NAME,
                "no oracle contract configured; skipping"
            );
            return Ok(());
        };

        let current = contract
            .current_variables()
            .await
            .map_err(TrackerError::Rpc)?;

        for (key, value) in entries(&current) {
            ctx.store(key, value).await?;
        }

        tracing::debug!(
            tracker = NAME,
            challenge = %current.challenge_hex(),
            request_id = current.request_id,
            "stored current challenge"
        );
        Ok(())
    }
}

/// Store entries for `current`, the challenge hash last. Readers compare the
/// challenge before and after reading the rest to detect a write in between.
fn entries(current: &CurrentChallenge) -> [(&'static str, Vec<u8>); 6] {
    [
        (keys::REQUEST_ID, encode_quantity(current.request_id).into_bytes()),
        (keys::DIFFICULTY, encode_quantity(current.difficulty).into_bytes()),
        (keys::QUERY_STRING, current.query_string.clone().into_bytes()),
        (keys::GRANULARITY, encode_quantity(current.granularity).into_bytes()),
        (keys::TOTAL_TIP, encode_quantity(current.total_tip).into_bytes()),
        (keys::CURRENT_CHALLENGE, current.challenge_hex().into_bytes()),
    ]
}

impl Tracker for CurrentVariablesTracker {
    fn name(&self) -> &str {
        NAME
    }

    fn exec<'a>(&'a self, ctx: &'a TrackerContext) -> TrackerFuture<'a> {
        Box::pin(self.run(ctx))
    }
}
