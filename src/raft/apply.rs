//! The apply pump (§4.6): delivers newly committed entries to the host, in
//! strictly ascending index order, exactly once each, without holding the
//! state lock across the (potentially slow) delivery channel send.

use std::sync::Arc;

use log::debug;

use crate::types::ApplyMsg;

use super::Raft;

impl Raft {
    /// Perpetual, single serializer: wakes whenever `commit_index` may have
    /// advanced (election/replication/handlers signal via `commit_signal`),
    /// then drains everything newly committed before going back to sleep.
    pub(super) async fn run_apply_pump(
        self: Arc<Self>,
        mut commit_signal_rx: tokio::sync::watch::Receiver<()>,
    ) {
        loop {
            if self.is_killed() {
                return;
            }

            let pending = {
                let state = self.state.lock().await;
                let from = state.last_applied + 1;
                let to = state.commit_index;
                if from > to {
                    None
                } else {
                    Some(
                        (from..=to)
                            .map(|i| (i, state.log[i as usize].command.clone()))
                            .collect::<Vec<_>>(),
                    )
                }
            };

            let Some(batch) = pending else {
                let _ = commit_signal_rx.changed().await;
                continue;
            };

            for (index, command) in batch {
                if self.is_killed() {
                    return;
                }
                let msg = ApplyMsg {
                    valid: true,
                    command,
                    index,
                };
                if self.apply_tx.send(msg).await.is_err() {
                    debug!("[{}] apply channel closed; stopping apply pump", self.me);
                    return;
                }
                let mut state = self.state.lock().await;
                // Only advance if nobody else delivered a later index meanwhile
                // — the pump is the sole producer, so this is always true, but
                // guards against ever moving last_applied backward.
                if index > state.last_applied {
                    state.last_applied = index;
                }
            }
        }
    }
}
