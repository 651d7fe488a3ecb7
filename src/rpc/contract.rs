use crate::rpc::client::RpcFuture;

/// Values the oracle contract reports for the request currently being mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentChallenge {
    pub challenge: [u8; 32],
    pub request_id: u128,
    pub difficulty: u128,
    pub query_string: String,
    pub granularity: u128,
    pub total_tip: u128,
}

impl CurrentChallenge {
    pub fn challenge_hex(&self) -> String {
        format!("0x{}", hex::encode(self.challenge))
    }
}

/// Read side of the oracle contract. ABI bindings live outside this crate.
pub trait OracleContract: Send + Sync {
    fn current_variables(&self) -> RpcFuture<'_, CurrentChallenge>;
}
