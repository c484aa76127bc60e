//! Cluster-wide synchronization: parallel fan-out and per-peer wait
//! callbacks.
//!
//! Every callback polls the peer's status endpoint and honors the abort flag
//! at each sleep. Epoch handling is centralized in [`classify_status`]:
//! newer Smap or rebalance generation on a peer aborts the local run (no
//! broadcast - the peers discover it through their own polls), stale peers
//! are waited out without burning the retry budget.

use crate::cluster::Snode;
use crate::error::TalusError;
use crate::reb::stage::Stage;
use crate::reb::status::Status;
use crate::reb::{RebManager, RunArgs};
use crate::types::RebId;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// What one peer status tells the local run to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusVerdict {
    /// Peer reached the desired stage.
    Ok,
    /// Stale peer or not there yet; keep polling.
    KeepWaiting,
    /// Peer runs a newer epoch; abort the local run immediately.
    AbortNewerEpoch,
    /// Peer aborted the same generation; local-only abort.
    AbortPeerAborted,
}

/// Pure classification of a peer status against the local run.
pub(crate) fn classify_status(
    status: &Status,
    local_ver: i64,
    local_reb_id: RebId,
    desired: Stage,
) -> StatusVerdict {
    // enforce Smap consistency across the run
    if status.smap_version > local_ver || status.reb_version > local_ver {
        return StatusVerdict::AbortNewerEpoch;
    }
    if status.glob_reb_id > local_reb_id {
        return StatusVerdict::AbortNewerEpoch;
    }
    // let stale peers catch up
    if status.smap_version < local_ver
        || status.reb_version < local_ver
        || status.glob_reb_id < local_reb_id
    {
        return StatusVerdict::KeepWaiting;
    }
    // the peer gave up on the very generation we are running
    if status.aborted {
        return StatusVerdict::AbortPeerAborted;
    }
    if status.stage >= desired {
        StatusVerdict::Ok
    } else {
        StatusVerdict::KeepWaiting
    }
}

impl RebManager {
    /// Parallel fan-out of `cb` to every other target; returns the number of
    /// peers whose callback reported failure.
    pub(crate) async fn bcast<F, Fut>(self: &Arc<Self>, md: &Arc<RunArgs>, cb: F) -> usize
    where
        F: Fn(Arc<RebManager>, Snode, Arc<RunArgs>) -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for tsi in md.smap.tmap.values() {
            if tsi.id == self.self_id {
                continue;
            }
            set.spawn(cb(Arc::clone(self), tsi.clone(), Arc::clone(md)));
        }
        let mut err_cnt = 0;
        while let Some(res) = set.join_next().await {
            if !res.unwrap_or(false) {
                err_cnt += 1;
            }
        }
        err_cnt
    }

    pub(crate) async fn fetch_status(&self, tsi: &Snode) -> crate::error::Result<Status> {
        let url = format!("{}/v1/health?rebalance=true", tsi.intra_control_url);
        let resp = self
            .client
            .get(url)
            .timeout(self.config.timeout.status_poll)
            .send()
            .await
            .map_err(|e| TalusError::PeerUnreachable {
                node: tsi.id,
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(TalusError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(resp.json::<Status>().await?)
    }

    async fn ping(&self, tsi: &Snode) -> crate::error::Result<()> {
        let url = format!("{}/v1/health", tsi.intra_control_url);
        let resp = self
            .client
            .get(url)
            .timeout(self.config.timeout.max_keepalive)
            .send()
            .await
            .map_err(|e| TalusError::PeerUnreachable {
                node: tsi.id,
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(TalusError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(())
    }

    /// Poll one peer's status and apply the epoch rules; `Some(status)` when
    /// the poll succeeded, plus whether the desired stage was reached. A
    /// transient HTTP failure is retried once; a second failure aborts the
    /// run.
    pub(crate) async fn check_status(
        self: &Arc<Self>,
        tsi: &Snode,
        md: &RunArgs,
        desired: Stage,
    ) -> (Option<Status>, bool) {
        let retry_sleep = self.config.timeout.keepalive_retry();
        let status = match self.fetch_status(tsi).await {
            Ok(s) => s,
            Err(_) => {
                if self.aborted_after(retry_sleep).await {
                    return (None, false);
                }
                match self.fetch_status(tsi).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(peer = %tsi, "status poll failed twice: {}", e);
                        self.abort_local(format!("peer t{} unreachable", tsi.id));
                        return (None, false);
                    }
                }
            }
        };
        match classify_status(&status, md.smap.version, md.id, desired) {
            StatusVerdict::Ok => (Some(status), true),
            StatusVerdict::KeepWaiting => (Some(status), false),
            StatusVerdict::AbortNewerEpoch => {
                warn!(
                    peer = %tsi,
                    smap = status.smap_version,
                    reb_id = status.glob_reb_id,
                    "peer runs a newer epoch - aborting"
                );
                self.abort_local("newer epoch observed");
                (None, false)
            }
            StatusVerdict::AbortPeerAborted => {
                warn!(peer = %tsi, id = status.glob_reb_id, "peer aborted g{} - aborting locally", status.glob_reb_id);
                self.abort_local("peer aborted the run");
                (None, false)
            }
        }
    }

    /// Check that the target is up; 3 attempts with control-plane sleeps.
    /// A newer cluster map observed between attempts gives up early.
    pub(crate) async fn ping_target(self: Arc<Self>, tsi: Snode, md: Arc<RunArgs>) -> bool {
        let sleep = self.config.timeout.cplane_operation;
        for attempt in 0..3 {
            match self.ping(&tsi).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(peer = %tsi, "is online");
                    }
                    return true;
                }
                Err(e) => warn!(peer = %tsi, attempt, "waiting for peer: {}", e),
            }
            tokio::time::sleep(sleep).await;
            if self.cluster_smap_version() > md.smap.version {
                return false;
            }
        }
        warn!(peer = %tsi, "timed out waiting for peer");
        false
    }

    /// Wait for the peer to get ready to receive objects (reach traverse).
    pub(crate) async fn rx_ready(self: Arc<Self>, tsi: Snode, md: Arc<RunArgs>) -> bool {
        let sleep = self.config.timeout.cplane_operation * 2;
        let maxwt = self.config.rebalance.dest_retry_time
            + self.config.rebalance.dest_retry_time / 2;
        let mut curwt = std::time::Duration::ZERO;
        while curwt < maxwt {
            if self.stages.is_in_stage(tsi.id, Stage::Traverse) {
                // push notification already arrived; skip the poll
                return true;
            }
            if let (_, true) = self.check_status(&tsi, &md, Stage::Traverse).await {
                return true;
            }
            if self.aborted_after(sleep).await {
                return false;
            }
            curwt += sleep;
        }
        warn!(peer = %tsi, "timed out waiting for rx-ready");
        false
    }

    /// Generic stage wait: poll until the peer reaches `stage`.
    pub(crate) async fn wait_stage(self: &Arc<Self>, tsi: &Snode, md: &Arc<RunArgs>, stage: Stage) -> bool {
        let sleep = self.config.timeout.cplane_operation * 2;
        let maxwt = self.config.rebalance.dest_retry_time
            + self.config.rebalance.dest_retry_time / 2;
        let mut curwt = std::time::Duration::ZERO;
        while curwt < maxwt {
            if self.stages.is_in_stage(tsi.id, stage) {
                return true;
            }
            if let (_, true) = self.check_status(tsi, md, stage).await {
                return true;
            }
            if self.aborted_after(sleep).await {
                return false;
            }
            curwt += sleep;
        }
        false
    }

    /// Wait for the peer to reach `fin`. A peer stuck in `wait-ack` is fine
    /// as long as it is not waiting for acks from *us*.
    pub(crate) async fn wait_fin_extended(self: Arc<Self>, tsi: Snode, md: Arc<RunArgs>) -> bool {
        let sleep = self.config.timeout.cplane_operation;
        let sleep_retry = self.config.timeout.keepalive_retry();
        let maxwt = self.config.rebalance.dest_retry_time;
        let mut curwt = std::time::Duration::ZERO;
        while curwt < maxwt {
            if self.aborted_after(sleep).await {
                return false;
            }
            curwt += sleep;
            if self.stages.is_in_stage(tsi.id, Stage::Fin) {
                return true;
            }
            let (status, ok) = self.check_status(&tsi, &md, Stage::Fin).await;
            if ok {
                return true;
            }
            let Some(status) = status else { return false };
            if self.aborted() {
                return false;
            }
            if status.stage <= Stage::EcNamespace {
                info!(peer = %tsi, stage = %status.stage, "keep waiting");
                tokio::time::sleep(sleep_retry).await;
                curwt += sleep_retry;
                if status.stage != Stage::Inactive {
                    // the peer is still traversing; wait it out
                    curwt = std::time::Duration::ZERO;
                }
                continue;
            }
            // peer in wait-ack: done for our purposes unless it waits on us
            let waits_for_me = status.tmap.contains_key(&self.self_id);
            if !waits_for_me {
                info!(peer = %tsi, stage = %status.stage, "ok (not waiting for me)");
                return true;
            }
            tokio::time::sleep(sleep_retry).await;
            curwt += sleep_retry;
        }
        warn!(peer = %tsi, "timed out waiting for fin");
        false
    }

    /// Wait until the peer has exchanged its EC namespace; pulls the listing
    /// when the peer's push has not arrived.
    pub(crate) async fn wait_ec_data(self: Arc<Self>, tsi: Snode, md: Arc<RunArgs>) -> bool {
        let sleep = self.config.timeout.cplane_operation * 2;
        let maxwt = self.config.rebalance.dest_retry_time
            + self.config.rebalance.dest_retry_time / 2;
        let mut curwt = std::time::Duration::ZERO;
        while curwt < maxwt {
            if self.aborted() {
                return true;
            }
            if self.stages.is_in_stage(tsi.id, Stage::EcDetect) && self.ec.has_node_data(tsi.id) {
                return true;
            }
            match self.fetch_ec_namespace(&tsi).await {
                Ok(Some(cts)) => {
                    self.ec.set_node_data(tsi.id, cts);
                    self.stages.set_stage(tsi.id, Stage::EcDetect, 0);
                    return true;
                }
                Ok(None) => {
                    // not ready yet
                    tokio::time::sleep(sleep).await;
                    curwt += sleep;
                }
                Err(e) => {
                    warn!(peer = %tsi, "namespace pull failed: {}", e);
                    self.abort_local(format!("namespace pull from t{} failed", tsi.id));
                    return false;
                }
            }
        }
        false
    }

    /// All targets quiescent: local transport queues empty and every peer
    /// reports `quiescent`.
    pub(crate) async fn nodes_quiescent(self: &Arc<Self>, md: &Arc<RunArgs>) -> bool {
        if !self.is_quiescent() {
            return false;
        }
        let desired = self.stage();
        for tsi in md.smap.tmap.values() {
            if tsi.id == self.self_id {
                continue;
            }
            let (status, _) = self.check_status(tsi, md, desired).await;
            match status {
                Some(s) if s.quiescent => {}
                _ => return false,
            }
        }
        true
    }

    /// Wait until at least a quorum of peers pushed the given stage. Early
    /// stages are too fast to be worth a wait loop: a single check decides.
    pub(crate) async fn wait_for_push_reqs(
        self: &Arc<Self>,
        md: &Arc<RunArgs>,
        stage: Stage,
        timeout: Option<std::time::Duration>,
    ) -> bool {
        use crate::reb::quiesce::PushQuorum;
        let peer_ids: Vec<_> = md
            .smap
            .tmap
            .keys()
            .copied()
            .filter(|&id| id != self.self_id)
            .collect();
        let quorum = PushQuorum::new(peer_ids.len(), stage <= Stage::EcNamespace);
        let sleep = self.config.timeout.cplane_operation * 2;
        let maxwt = timeout.unwrap_or(std::time::Duration::from_secs(60));
        let mut curwt = std::time::Duration::ZERO;
        loop {
            if self.aborted() {
                return true;
            }
            let missing = self
                .stages
                .count_not_in_stage(&peer_ids, self.self_id, stage);
            if quorum.satisfied(missing) || stage <= Stage::EcNamespace {
                return missing == 0;
            }
            if curwt >= maxwt {
                return false;
            }
            tokio::time::sleep(sleep).await;
            curwt += sleep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(smap: i64, reb: i64, id: RebId, stage: Stage) -> Status {
        Status {
            smap_version: smap,
            reb_version: reb,
            glob_reb_id: id,
            stage,
            running: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_newer_epoch_aborts() {
        let s = status(8, 7, 10, Stage::Traverse);
        assert_eq!(
            classify_status(&s, 7, 10, Stage::Fin),
            StatusVerdict::AbortNewerEpoch
        );
        let s = status(7, 7, 11, Stage::Traverse);
        assert_eq!(
            classify_status(&s, 7, 10, Stage::Fin),
            StatusVerdict::AbortNewerEpoch
        );
    }

    #[test]
    fn test_stale_peer_keeps_waiting() {
        let s = status(6, 6, 9, Stage::Done);
        assert_eq!(
            classify_status(&s, 7, 10, Stage::Fin),
            StatusVerdict::KeepWaiting
        );
    }

    #[test]
    fn test_same_id_aborted_peer() {
        let mut s = status(7, 7, 10, Stage::WaitAck);
        s.aborted = true;
        assert_eq!(
            classify_status(&s, 7, 10, Stage::Fin),
            StatusVerdict::AbortPeerAborted
        );
    }

    #[test]
    fn test_stage_reached() {
        let s = status(7, 7, 10, Stage::Fin);
        assert_eq!(classify_status(&s, 7, 10, Stage::Fin), StatusVerdict::Ok);
        let s = status(7, 7, 10, Stage::Done);
        assert_eq!(classify_status(&s, 7, 10, Stage::Fin), StatusVerdict::Ok);
        let s = status(7, 7, 10, Stage::WaitAck);
        assert_eq!(
            classify_status(&s, 7, 10, Stage::Fin),
            StatusVerdict::KeepWaiting
        );
    }
}
