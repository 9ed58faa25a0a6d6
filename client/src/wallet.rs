//! Balance refresh signalling.
//!
//! The engine never writes wallet state. After a session settles it posts a [BalanceRefresh]
//! and the wallet projection, which owns the balance, decides what to do with it.

use minigame_types::{RewardSource, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceRefresh {
    pub session_id: SessionId,
    pub source: RewardSource,
    /// Balance reported by the authority, if it sent one.
    pub new_balance: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct WalletSyncNotifier {
    sender: Option<mpsc::Sender<BalanceRefresh>>,
}

impl WalletSyncNotifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BalanceRefresh>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Fire and forget: a full or closed channel drops the signal.
    pub fn notify(&self, refresh: BalanceRefresh) {
        let Some(sender) = &self.sender else {
            return;
        };
        let session_id = refresh.session_id.clone();
        match sender.try_send(refresh) {
            Ok(()) => debug!(%session_id, "balance refresh requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%session_id, "wallet channel full; dropping balance refresh")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%session_id, "wallet listener gone; dropping balance refresh")
            }
        }
    }
}
