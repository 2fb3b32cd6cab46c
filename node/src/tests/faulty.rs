use crate::channel::{ChannelState, ZChannel};
use crate::errors::{ChannelError, ProtocolError};
use crate::ledger::{Ledger, MockLedger, RelayLedger};
use crate::network::testing::new_test_transports;
use crate::tests::{
    established_pair, init_pair, new_channel_pair, test_params, DEFAULT_WAIT_TIMEOUT,
};
use assert_matches::assert_matches;
use std::sync::Arc;
use std::time::Duration;
use zchannel_primitives::{PartyIndex, ValuePair};

const SHORT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_operations_check_state_first() {
    let (mut first, mut second, ledger) = new_channel_pair(test_params(DEFAULT_WAIT_TIMEOUT));
    assert_matches!(
        first.establish().await,
        Err(ChannelError::InvalidState {
            operation: "establish",
            state: ChannelState::Uninitialized
        })
    );
    assert_matches!(
        first.update(ValuePair::new(1, 1)).await,
        Err(ChannelError::InvalidState { operation: "update", .. })
    );
    assert_matches!(
        first.accept_update().await,
        Err(ChannelError::InvalidState { .. })
    );
    assert_matches!(
        first.close(true).await,
        Err(ChannelError::InvalidState { operation: "close", .. })
    );
    assert_eq!(first.state(), ChannelState::Uninitialized);

    init_pair(&mut first, &mut second, [ValuePair::new(3, 4); 2]).await;
    let (t0, _t1) = new_test_transports();
    assert_matches!(
        first.init(t0, ValuePair::new(3, 4)).await,
        Err(ChannelError::InvalidState {
            operation: "init",
            state: ChannelState::Initialized
        })
    );
    assert_matches!(
        first.update(ValuePair::new(4, 3)).await,
        Err(ChannelError::InvalidState { .. })
    );
    assert_eq!(first.state(), ChannelState::Initialized);

    // The rejected calls left the session usable.
    let (a, b) = futures::future::join(first.establish(), second.establish()).await;
    a.unwrap();
    b.unwrap();
    assert_eq!(ledger.published().len(), 3);
}

#[tokio::test]
async fn test_overflowing_initial_balances() {
    let (mut first, _second, _ledger) = new_channel_pair(test_params(DEFAULT_WAIT_TIMEOUT));
    let (t0, _t1) = new_test_transports();
    assert_matches!(
        first.init(t0, ValuePair::new(u64::MAX, 1)).await,
        Err(ChannelError::InvalidBalance(_))
    );
    assert_eq!(first.state(), ChannelState::Uninitialized);
}

#[tokio::test]
async fn test_unbalanced_update_is_refused_locally() {
    let (mut first, mut second, _ledger) =
        established_pair(test_params(DEFAULT_WAIT_TIMEOUT), ValuePair::new(100, 100)).await;
    assert_matches!(
        first.update(ValuePair::new(100, 101)).await,
        Err(ChannelError::InvalidBalance(_))
    );
    assert_eq!(first.balances(), &[ValuePair::new(100, 100)]);
    assert_eq!(first.state(), ChannelState::Established);

    // Nothing was sent, so the next proposal still uses sequence 1.
    let (a, b) =
        futures::future::join(first.update(ValuePair::new(0, 200)), second.accept_update()).await;
    a.unwrap();
    assert_eq!(b.unwrap(), ValuePair::new(0, 200));
}

#[tokio::test]
async fn test_unanswered_update_times_out_and_rolls_back() {
    let (mut first, _second, _ledger) =
        established_pair(test_params(SHORT_WAIT_TIMEOUT), ValuePair::new(100, 100)).await;
    // Establishing used signing runs 0 to 3; party 0 commits to its nonce
    // for run 4 and waits for the peer's reveal that never comes.
    assert_matches!(
        first.update(ValuePair::new(90, 110)).await,
        Err(ChannelError::Timeout { label }) if label == "pka:4"
    );
    assert_eq!(first.state(), ChannelState::Established);
    assert_eq!(first.balances(), &[ValuePair::new(100, 100)]);
    assert_eq!(first.close_notes().len(), 1);
    assert!(first.state_signatures().is_empty());
}

#[tokio::test]
async fn test_mismatched_initial_balances_are_refused_at_init() {
    let (mut first, mut second, ledger) = new_channel_pair(test_params(DEFAULT_WAIT_TIMEOUT));
    let (t0, t1) = new_test_transports();
    let (a, b) = futures::future::join(
        first.init(t0, ValuePair::new(100, 100)),
        second.init(t1, ValuePair::new(90, 110)),
    )
    .await;
    assert_matches!(
        a,
        Err(ChannelError::Protocol(ProtocolError::InitialBalanceMismatch { local, peer }))
            if local == "(100, 100)" && peer == "(90, 110)"
    );
    assert_matches!(
        b,
        Err(ChannelError::Protocol(ProtocolError::InitialBalanceMismatch { .. }))
    );
    for channel in [&first, &second] {
        assert_eq!(channel.state(), ChannelState::Uninitialized);
        assert!(channel.share_note().is_none());
    }
    assert!(ledger.published().is_empty());

    // Nothing was kept, so the pair can start over with agreeing balances.
    init_pair(&mut first, &mut second, [ValuePair::new(100, 100); 2]).await;
}

#[tokio::test]
async fn test_ledger_failure_surfaces() {
    let mut ledger = MockLedger::new();
    ledger
        .expect_publish()
        .returning(|_, _, _| Err(anyhow::anyhow!("ledger unavailable")));
    let mut first = ZChannel::new(
        PartyIndex::ZERO,
        test_params(SHORT_WAIT_TIMEOUT),
        Arc::new(ledger),
    );
    let mut second = ZChannel::new(
        PartyIndex::ONE,
        test_params(SHORT_WAIT_TIMEOUT),
        Arc::new(RelayLedger::new()) as Arc<dyn Ledger>,
    );
    init_pair(&mut first, &mut second, [ValuePair::new(7, 7); 2]).await;
    let (a, b) = futures::future::join(first.establish(), second.establish()).await;
    assert_matches!(a, Err(ChannelError::Transport(err)) if err.to_string() == "ledger unavailable");
    assert_matches!(b, Err(ChannelError::Timeout { label }) if label == "conf:fund0");
    assert_eq!(first.state(), ChannelState::WaitConfirmShare);

    first.abort().await;
    assert_eq!(first.state(), ChannelState::Uninitialized);
    assert!(first.close_notes().is_empty());
}

#[tokio::test]
async fn test_peer_abort_cancels_pending_wait() {
    let (mut first, mut second, _ledger) =
        established_pair(test_params(DEFAULT_WAIT_TIMEOUT), ValuePair::new(1, 1)).await;
    first.abort().await;
    assert_matches!(second.accept_update().await, Err(ChannelError::Cancelled));
    assert_eq!(second.state(), ChannelState::Established);
    second.abort().await;
    assert_eq!(second.state(), ChannelState::Uninitialized);
}
