use crate::coin::{Note, SignedShareNote};
use crate::network::Messenger;
use crate::primitives::Label;
use std::sync::{Arc, Mutex};
use zchannel_primitives::{PartyIndex, Uint256};

#[cfg(test)]
use mockall::automock;

/// Something a party puts on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerItem {
    FundCoin { owner: PartyIndex, commitment: Uint256 },
    ShareNote(SignedShareNote),
    CloseNote { sequence: u64, note: Note },
    RedeemNote { sequence: u64, note: Note },
}

/// The only contract of `publish` is that the confirmation message named by
/// `confirmation` eventually reaches both parties' inboxes.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn publish(
        &self,
        confirmation: &Label,
        item: LedgerItem,
        messenger: &Messenger,
    ) -> anyhow::Result<()>;
}

/// Confirms every item immediately: the confirmation is put into the local
/// inbox and relayed to the peer over the session.
#[derive(Default, Clone)]
pub struct RelayLedger {
    published: Arc<Mutex<Vec<LedgerItem>>>,
}

impl RelayLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<LedgerItem> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Ledger for RelayLedger {
    async fn publish(
        &self,
        confirmation: &Label,
        item: LedgerItem,
        messenger: &Messenger,
    ) -> anyhow::Result<()> {
        tracing::info!(%confirmation, "publishing to ledger");
        if !messenger.deliver_local(confirmation, "") {
            anyhow::bail!("confirmation {} was already delivered", confirmation);
        }
        self.published.lock().unwrap().push(item);
        messenger.send(confirmation, "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::new_test_messengers;
    use crate::primitives::MessageKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_relay_confirms_to_both_parties() {
        let (first, second) = new_test_messengers(Duration::from_secs(5));
        let ledger = RelayLedger::new();
        let label = Label::new(MessageKind::Confirmation, "fund0");
        let item = LedgerItem::FundCoin {
            owner: PartyIndex::ZERO,
            commitment: Uint256::from_u64(5),
        };
        ledger.publish(&label, item.clone(), &first).await.unwrap();

        assert_eq!(first.wait_for(&label).await.unwrap(), "");
        assert_eq!(second.wait_for(&label).await.unwrap(), "");
        assert_eq!(ledger.published(), vec![item.clone()]);

        // Publishing the same confirmation twice in one session is refused.
        assert!(ledger.publish(&label, item, &first).await.is_err());
        assert_eq!(ledger.published().len(), 1);
    }
}
