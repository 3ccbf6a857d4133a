//! # DPOS Consensus Flows
//!
//! Four validators with equal stake run one height end to end:
//!
//! 1. **Happy path**: the turn leader proposes, every validator verifies,
//!    votes and finishes POS with the same quorum-signed header.
//! 2. **Silent leader**: nobody proposes, the turn window closes and the
//!    reelection protocol hands the height to the next leader.
//! 3. **Tampered topology**: validators refuse a proposal whose topology
//!    does not match the election, then recover through reelection.
//! 4. **Next head**: importing the finished block moves every node to the
//!    following height and stops the old height's resend loops.

#[cfg(test)]
mod tests {
    use crate::network::{transaction, TestNetwork, PARENT_NUMBER};
    use qc_08_dpos_consensus::domain::{ConsensusTurn, TopologyEntry, Transaction};
    use qc_08_dpos_consensus::ports::{ConsensusApi, TimeSource};
    use qc_08_dpos_consensus::{ConsensusInput, LeaderChangeNotify, RoleUpdate};
    use shared_types::{Address, Hash, Role};
    use std::time::Duration;

    const VALIDATORS: u8 = 4;

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn started_network() -> (TestNetwork, LeaderChangeNotify) {
        let net = TestNetwork::new(VALIDATORS);
        net.start_height().await;
        let announced = net
            .wait_until(Duration::from_secs(1), |n| {
                n.nodes.iter().all(|node| node.last_leader_change().is_some())
            })
            .await;
        assert!(announced, "leader was not announced on every node");

        let notify = net.nodes[0].last_leader_change().unwrap();
        for node in &net.nodes {
            let view = node.last_leader_change().unwrap();
            assert_eq!(view.leader, notify.leader);
            assert_eq!(view.consensus_turn, notify.consensus_turn);
        }
        (net, notify)
    }

    fn finished_everywhere(net: &TestNetwork, fingerprint: Hash) -> bool {
        net.nodes.iter().all(|node| {
            node.pos_finished()
                .iter()
                .any(|p| p.header.fingerprint() == fingerprint)
        })
    }

    fn leader_adopted(net: &TestNetwork, leader: Address, total_turn: u32) -> bool {
        net.nodes.iter().all(|node| {
            node.last_leader_change().is_some_and(|n| {
                n.consensus_state && n.leader == leader && n.consensus_turn.total() == total_turn
            })
        })
    }

    /// Waits for the reelection that follows an unfinished first turn.
    async fn reelect(net: &TestNetwork, first: &LeaderChangeNotify) -> LeaderChangeNotify {
        let next = first.next_leader;
        let adopted = net
            .wait_until(Duration::from_secs(120), |n| leader_adopted(n, next, 1))
            .await;
        assert!(adopted, "reelection did not converge on the next leader");

        let notify = net.node(&next).last_leader_change().unwrap();
        assert!(notify.turn_begin_time >= first.turn_end_time);
        assert_eq!(notify.pre_leader, first.pre_leader);
        notify
    }

    /// Proposes from `notify.leader` inside its turn window.
    async fn propose_in_turn(
        net: &TestNetwork,
        notify: &LeaderChangeNotify,
        txs: &[Transaction],
    ) -> Hash {
        while net.clock.now() < notify.turn_begin_time {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(net.clock.now() <= notify.turn_end_time);
        let request = net.propose(notify.leader, notify.consensus_turn, txs);
        let fingerprint = request.fingerprint();
        net.submit(request, txs).await;
        fingerprint
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_leader_proposal_reaches_pos_on_every_node() {
        let (net, notify) = started_network().await;
        assert!(notify.consensus_state);
        assert_eq!(notify.number, PARENT_NUMBER + 1);
        assert_eq!(notify.consensus_turn, ConsensusTurn::default());
        assert_eq!(notify.pre_leader, net.parent.leader);

        let txs = [transaction(1), transaction(2), transaction(3)];
        let fingerprint = propose_in_turn(&net, &notify, &txs).await;

        let finished = net
            .wait_until(Duration::from_secs(10), |n| finished_everywhere(n, fingerprint))
            .await;
        assert!(finished, "POS did not finish on every node");

        for node in &net.nodes {
            let pos = node.pos_finished();
            assert_eq!(pos.len(), 1);
            assert_eq!(pos[0].number, PARENT_NUMBER + 1);
            assert!(pos[0].header.signatures.len() >= 3);
            assert!(net.hub.sent_count("mining_request", Some(node.address)) >= 1);
            assert_eq!(node.bus.count_of("block_verified"), 1);
        }
        // The leader trusts its own block and still votes for it
        assert!(net.hub.sent_count("block_vote", Some(notify.leader)) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_leader_is_replaced_by_reelection() {
        let (net, first) = started_network().await;
        let silent = first.leader;

        let notify = reelect(&net, &first).await;
        assert_ne!(notify.leader, silent);
        assert!(net.hub.sent_count("inquiry_req", None) >= 1);
        assert!(net.hub.sent_count("result_broadcast", None) >= 1);
        for node in &net.nodes {
            assert!(node.pos_finished().is_empty());
            // Reelection paused block verification before handing over
            assert!(node
                .bus
                .leader_changes()
                .iter()
                .any(|n| !n.consensus_state));
        }

        let txs = [transaction(7)];
        let fingerprint = propose_in_turn(&net, &notify, &txs).await;
        let finished = net
            .wait_until(Duration::from_secs(10), |n| finished_everywhere(n, fingerprint))
            .await;
        assert!(finished, "new leader's proposal did not finish");
        for node in &net.nodes {
            let pos = node.pos_finished();
            assert_eq!(pos[0].header.leader, notify.leader);
            assert_eq!(pos[0].consensus_turn.total(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tampered_topology_is_refused_then_recovered() {
        let (net, first) = started_network().await;
        let txs = [transaction(3)];
        for tx in &txs {
            net.txs.insert(tx.clone());
        }

        let mut request = net.propose(first.leader, first.consensus_turn, &txs);
        request.header.net_topology.entries.push(TopologyEntry {
            account: [0xEE; 20],
            position: 99,
        });
        let tampered = request.fingerprint();
        net.submit(request, &txs).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        for node in &net.nodes {
            assert!(node.pos_finished().is_empty());
            if node.address != first.leader {
                assert_eq!(node.bus.count_of("block_verified"), 0);
                assert_eq!(net.hub.sent_count("block_vote", Some(node.address)), 0);
            }
        }

        let notify = reelect(&net, &first).await;
        let fingerprint = propose_in_turn(&net, &notify, &txs).await;
        let finished = net
            .wait_until(Duration::from_secs(10), |n| finished_everywhere(n, fingerprint))
            .await;
        assert!(finished, "honest proposal after reelection did not finish");
        for node in &net.nodes {
            assert!(node
                .pos_finished()
                .iter()
                .all(|p| p.header.fingerprint() != tampered));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_head_moves_every_node_forward() {
        let (net, notify) = started_network().await;
        let txs = [transaction(9)];
        let fingerprint = propose_in_turn(&net, &notify, &txs).await;
        assert!(
            net.wait_until(Duration::from_secs(10), |n| finished_everywhere(n, fingerprint))
                .await
        );

        let head = net.nodes[0].pos_finished()[0].header.clone();
        net.chain.insert(head.clone());
        for node in &net.nodes {
            node.service
                .handle(ConsensusInput::RoleUpdated(RoleUpdate {
                    role: Role::Validator,
                    header: head.clone(),
                }))
                .await
                .unwrap();
        }

        for node in &net.nodes {
            assert_eq!(node.service.current_number(), PARENT_NUMBER + 2);
            assert_eq!(node.service.live_heights(), vec![PARENT_NUMBER + 2]);
        }

        // The closed height stops resending its mining request
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = net.hub.sent_count("mining_request", None);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(net.hub.sent_count("mining_request", None), before);

        let next = net
            .wait_until(Duration::from_secs(1), |n| {
                n.nodes.iter().all(|node| {
                    node.last_leader_change()
                        .is_some_and(|l| l.number == PARENT_NUMBER + 2)
                })
            })
            .await;
        assert!(next, "next height did not announce a leader");
        assert_eq!(
            net.nodes[0].last_leader_change().unwrap().pre_leader,
            notify.leader
        );
    }
}
