use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, instrument};

use crate::backend::ChainBackendController;
use crate::error::Error;
use crate::model::{FundingState, NodeId};
use crate::node::NodeController;
use crate::poller::wait_until;
use crate::policy::Policy;

/// One top-up sent from the backend wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Deposit {
    pub node: NodeId,
    pub address: String,
    pub amount_sat: u64,
    pub txid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FundingReport {
    pub deposits: Vec<Deposit>,
    /// Nodes that already held enough
    pub already_funded: Vec<NodeId>,
    /// Blocks mined to confirm the deposits
    pub blocks_mined: u64,
}

/// Brings every node up to the minimum on-chain balance, with the backend
/// wallet as the only source of funds
pub struct FundingCoordinator<'a> {
    backend: &'a mut ChainBackendController,
    policy: &'a Policy,
}

impl<'a> FundingCoordinator<'a> {
    pub fn new(backend: &'a mut ChainBackendController, policy: &'a Policy) -> Self {
        FundingCoordinator { backend, policy }
    }

    /// Send a top-up to `node` unless it already holds `min_amount_sat`,
    /// counting unconfirmed outputs so an interrupted run does not pay twice
    #[instrument(skip_all, fields(node = %node.id()))]
    pub async fn ensure_funded(
        &mut self,
        node: &mut NodeController,
        min_amount_sat: u64,
    ) -> Result<Option<Deposit>, Error> {
        let balances = node.balances().await?;
        if balances.confirmed_sat >= min_amount_sat {
            info!("{} already funded with {} sat", node.id(), balances.confirmed_sat);
            node.advance_funding(FundingState::Confirmed);
            return Ok(None);
        }
        if balances.total_sat() >= min_amount_sat {
            info!("{} has {} sat awaiting confirmation", node.id(), balances.unconfirmed_sat);
            node.advance_funding(FundingState::FundingSent);
            return Ok(None);
        }

        let address = node.new_address().await?;
        let amount_sat = self.policy.topup_sat;
        let txid = self.backend.pay_to(&address, amount_sat).await?;
        node.advance_funding(FundingState::FundingSent);
        Ok(Some(Deposit { node: node.id(), address, amount_sat, txid }))
    }

    /// Mine `count` blocks on top of the deposits
    pub async fn confirm_funding(&mut self, count: u64) -> Result<u64, Error> {
        self.backend.mine(count).await
    }

    /// Fund the whole roster: every send first, then a single confirmation
    /// batch if anything is pending, then wait for each node to see its
    /// funds confirmed
    #[instrument(skip_all)]
    pub async fn fund_all(&mut self, nodes: &mut [NodeController]) -> Result<FundingReport, Error> {
        let min = self.policy.min_balance_sat;
        let mut report = FundingReport::default();
        for node in nodes.iter_mut() {
            match self.ensure_funded(node, min).await? {
                Some(deposit) => report.deposits.push(deposit),
                None if node.node().funding_state() == FundingState::Confirmed =>
                    report.already_funded.push(node.id()),
                None => {}
            }
        }

        let pending: Vec<&mut NodeController> = nodes
            .iter_mut()
            .filter(|n| n.node().funding_state() == FundingState::FundingSent)
            .collect();
        if pending.is_empty() {
            return Ok(report);
        }
        report.blocks_mined = self.confirm_funding(self.policy.funding_confirmations).await?;

        let spec = self.policy.funding_confirm_poll();
        try_join_all(pending.into_iter().map(|node| async move {
            let id = node.id();
            let probe_node = &*node;
            wait_until("funding confirmed", spec, move || async move {
                let balances = probe_node.balances().await.map_err(|e| e.to_string())?;
                if balances.confirmed_sat >= min {
                    Ok(())
                } else {
                    Err(format!(
                        "confirmed {} sat, unconfirmed {} sat",
                        balances.confirmed_sat, balances.unconfirmed_sat
                    ))
                }
            })
            .await
            .map_err(|t| Error::FundingNotConfirmed {
                node: id,
                call: "listfunds",
                elapsed: t.elapsed,
                last: t.last(),
            })?;
            node.advance_funding(FundingState::Confirmed);
            Ok::<_, Error>(())
        }))
        .await?;
        Ok(report)
    }
}
