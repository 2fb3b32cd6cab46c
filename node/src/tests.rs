use crate::channel::{ChannelParams, ChannelState, ZChannel};
use crate::ledger::{Ledger, RelayLedger};
use crate::network::testing::new_test_transports;
use std::sync::Arc;
use std::time::Duration;
use zchannel_primitives::{PartyIndex, ValuePair};

mod faulty;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_params(wait_timeout: Duration) -> ChannelParams {
    ChannelParams {
        wait_timeout,
        derivation_cache_capacity: 16,
    }
}

/// Two channel ends sharing one relay ledger, not yet initialized.
pub fn new_channel_pair(params: ChannelParams) -> (ZChannel, ZChannel, RelayLedger) {
    let ledger = RelayLedger::new();
    let handle: Arc<dyn Ledger> = Arc::new(ledger.clone());
    (
        ZChannel::new(PartyIndex::ZERO, params, handle.clone()),
        ZChannel::new(PartyIndex::ONE, params, handle),
        ledger,
    )
}

pub async fn init_pair(first: &mut ZChannel, second: &mut ZChannel, balances: [ValuePair; 2]) {
    let (t0, t1) = new_test_transports();
    let (a, b) =
        futures::future::join(first.init(t0, balances[0]), second.init(t1, balances[1])).await;
    a.unwrap();
    b.unwrap();
    assert_eq!(first.state(), ChannelState::Initialized);
    assert_eq!(second.state(), ChannelState::Initialized);
}

/// Initializes and establishes a channel with `balances` on both sides.
pub async fn established_pair(
    params: ChannelParams,
    balances: ValuePair,
) -> (ZChannel, ZChannel, RelayLedger) {
    let (mut first, mut second, ledger) = new_channel_pair(params);
    init_pair(&mut first, &mut second, [balances; 2]).await;
    let (a, b) = futures::future::join(first.establish(), second.establish()).await;
    a.unwrap();
    b.unwrap();
    assert_eq!(first.state(), ChannelState::Established);
    assert_eq!(second.state(), ChannelState::Established);
    (first, second, ledger)
}
