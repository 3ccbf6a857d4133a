//! # In-Memory DPOS Network
//!
//! Runs several complete [`DposConsensusService`] nodes against each other.
//! Each node signs with a real secp256k1 key and checks stake quorum the
//! way production does; only storage, election and execution are doubles.
//!
//! ```text
//!   node A ─┐                         ┌─→ node B
//!   node B ─┼─ HubTransport ─→ [Hub] ─┼─→ node C
//!   node C ─┘   (unbounded queue)     └─→ node A   (never back to sender)
//! ```
//!
//! The hub delivers messages in send order from a single pump task, so a
//! paused tokio clock makes every run deterministic.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use qc_08_dpos_consensus::domain::{
    BalanceAdjustment, BlockHeader, BlockRequest, BroadcastInterval, ConsensusMessage,
    ConsensusTurn, ElectionEntry, ExecutionOutcome, LeaderTimingConfig, LocalBlockRequest,
    NetTopology, Receipt, Target, TopologyEntry, TopologyGraph, TopologyKind,
    TopologyNode, Transaction,
};
use qc_08_dpos_consensus::ports::{
    ChainReader, ConsensusApi, ConsensusPorts, ElectionSource, ExecutionEngine, SignatureService,
    TimeSource, Transport, TxSource,
};
use qc_08_dpos_consensus::{
    ConsensusConfig, ConsensusEvent, ConsensusInput, DposConsensusService, InMemoryEventBus,
    K256Signer, LeaderChangeNotify, PosFinishedNotify, RoleUpdate, StakeQuorum,
};
use shared_types::{keccak256, Address, Hash, Role};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Unix seconds of the parent block every scenario builds on.
pub const PARENT_TIME: u64 = 1_700_000_000;
pub const PARENT_NUMBER: u64 = 41;

/// Installs a test subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// TIME
// =============================================================================

/// Wall clock that follows tokio time, so `start_paused` tests move it.
pub struct TokioClock {
    base_millis: u64,
    start: Instant,
}

impl TokioClock {
    pub fn starting_at(secs: u64) -> Self {
        Self {
            base_millis: secs * 1000,
            start: Instant::now(),
        }
    }
}

impl TimeSource for TokioClock {
    fn now(&self) -> u64 {
        self.now_millis() / 1000
    }

    fn now_millis(&self) -> u64 {
        self.base_millis + self.start.elapsed().as_millis() as u64
    }
}

// =============================================================================
// SHARED CHAIN DOUBLES
// =============================================================================

#[derive(Default)]
pub struct StaticChain {
    headers: RwLock<HashMap<Hash, BlockHeader>>,
}

impl StaticChain {
    pub fn insert(&self, header: BlockHeader) {
        self.headers.write().insert(header.hash(), header);
    }
}

impl ChainReader for StaticChain {
    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        self.headers.read().get(hash).cloned()
    }

    fn has_state(&self, hash: &Hash) -> bool {
        self.headers.read().contains_key(hash)
    }
}

/// One validator set with equal stake, whatever the parent.
pub struct StaticElection {
    graph: TopologyGraph,
}

impl StaticElection {
    pub fn new(validators: &[Address]) -> Self {
        let nodes = validators
            .iter()
            .enumerate()
            .map(|(i, account)| TopologyNode {
                account: *account,
                role: Role::Validator,
                position: i as u16,
                stake: 100,
            })
            .collect();
        Self {
            graph: TopologyGraph::new(PARENT_NUMBER, nodes),
        }
    }

    pub fn entries(&self) -> Vec<ElectionEntry> {
        self.graph
            .nodes
            .iter()
            .map(|n| ElectionEntry {
                account: n.account,
                stake: n.stake,
                role: n.role,
            })
            .collect()
    }

    pub fn net_topology(&self) -> NetTopology {
        NetTopology {
            kind: TopologyKind::Change,
            entries: self
                .graph
                .nodes
                .iter()
                .map(|n| TopologyEntry {
                    account: n.account,
                    position: n.position,
                })
                .collect(),
        }
    }
}

impl ElectionSource for StaticElection {
    fn topology_graph(&self, _parent_hash: &Hash) -> Result<TopologyGraph, String> {
        Ok(self.graph.clone())
    }

    fn election_graph(&self, _parent_hash: &Hash) -> Result<Vec<ElectionEntry>, String> {
        Ok(self.entries())
    }

    fn expected_topology(
        &self,
        _parent_hash: &Hash,
        _header: &BlockHeader,
    ) -> Result<NetTopology, String> {
        Ok(self.net_topology())
    }

    fn leader_config(&self, _parent_hash: &Hash) -> Result<LeaderTimingConfig, String> {
        Ok(LeaderTimingConfig::default())
    }

    fn broadcast_interval(&self, _parent_hash: &Hash) -> Result<BroadcastInterval, String> {
        Ok(BroadcastInterval::default())
    }
}

#[derive(Default)]
pub struct SharedTxPool {
    txs: RwLock<HashMap<Hash, Transaction>>,
}

impl SharedTxPool {
    pub fn insert(&self, tx: Transaction) {
        self.txs.write().insert(tx.hash, tx);
    }
}

#[async_trait]
impl TxSource for SharedTxPool {
    async fn resolve(
        &self,
        _number: u64,
        tx_codes: Vec<Hash>,
        leader: Address,
        _seq: u64,
    ) -> Result<Vec<Transaction>, String> {
        let txs = self.txs.read();
        tx_codes
            .iter()
            .map(|code| {
                txs.get(code).cloned().ok_or_else(|| {
                    format!("transaction {} unknown to leader {}", hex::encode(code), hex::encode(leader))
                })
            })
            .collect()
    }
}

/// Roots derive from the parent hash and the transaction hashes.
pub fn execute_on(parent_hash: &Hash, txs: &[Transaction]) -> ExecutionOutcome {
    let mut tx_bytes = Vec::with_capacity(txs.len() * 32);
    for tx in txs {
        tx_bytes.extend_from_slice(&tx.hash);
    }
    let tx_root = keccak256(&tx_bytes);
    let mut state_input = parent_hash.to_vec();
    state_input.extend_from_slice(&tx_root);
    ExecutionOutcome {
        gas_used: 21_000 * txs.len() as u64,
        tx_root,
        receipt_root: keccak256(&tx_root),
        state_root: keccak256(&state_input),
        receipts: txs
            .iter()
            .map(|tx| Receipt {
                tx_hash: tx.hash,
                gas_used: 21_000,
                success: true,
            })
            .collect(),
    }
}

pub struct DeterministicExecution;

impl ExecutionEngine for DeterministicExecution {
    fn reward_and_slash(&self, _header: &BlockHeader) -> Result<Vec<BalanceAdjustment>, String> {
        Ok(Vec::new())
    }

    fn execute(
        &self,
        header: &BlockHeader,
        transactions: &[Transaction],
        _adjustments: &[BalanceAdjustment],
    ) -> Result<ExecutionOutcome, String> {
        Ok(execute_on(&header.parent_hash, transactions))
    }

    fn verify_header(&self, header: &BlockHeader) -> Result<(), String> {
        if header.gas_used > header.gas_limit {
            return Err("gas used above limit".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// HUB
// =============================================================================

struct Envelope {
    from: Address,
    message: ConsensusMessage,
    target: Target,
}

struct Peer {
    address: Address,
    role: Role,
    service: Weak<DposConsensusService>,
}

/// Message switch shared by every node of the network.
pub struct Hub {
    queue: mpsc::UnboundedSender<Envelope>,
    peers: RwLock<Vec<Peer>>,
    log: Mutex<Vec<(Address, &'static str)>>,
}

impl Hub {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            queue,
            peers: RwLock::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        });
        (hub, rx)
    }

    fn join(&self, address: Address, role: Role, service: &Arc<DposConsensusService>) {
        self.peers.write().push(Peer {
            address,
            role,
            service: Arc::downgrade(service),
        });
    }

    /// Queues `message` as if `from` had sent it.
    pub fn post(&self, from: Address, message: ConsensusMessage, target: Target) {
        self.log.lock().push((from, message.name()));
        let _ = self.queue.send(Envelope {
            from,
            message,
            target,
        });
    }

    /// Messages named `name` sent so far, optionally only from `from`.
    pub fn sent_count(&self, name: &str, from: Option<Address>) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(sender, sent)| *sent == name && from.map_or(true, |f| f == *sender))
            .count()
    }

    fn recipients(&self, envelope: &Envelope) -> Vec<Arc<DposConsensusService>> {
        self.peers
            .read()
            .iter()
            .filter(|p| p.address != envelope.from)
            .filter(|p| match &envelope.target {
                Target::Roles(roles) => roles.contains(&p.role),
                Target::Peer(address) => *address == p.address,
            })
            .filter_map(|p| p.service.upgrade())
            .collect()
    }

    async fn pump(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            for service in self.recipients(&envelope) {
                let input = ConsensusInput::Network {
                    from: envelope.from,
                    message: envelope.message.clone(),
                };
                if let Err(e) = service.handle(input).await {
                    debug!(message = envelope.message.name(), error = %e, "Delivery rejected");
                }
            }
        }
    }
}

pub struct HubTransport {
    address: Address,
    hub: Arc<Hub>,
}

impl Transport for HubTransport {
    fn send(&self, message: ConsensusMessage, target: Target) -> Result<(), String> {
        self.hub.post(self.address, message, target);
        Ok(())
    }
}

// =============================================================================
// NETWORK
// =============================================================================

pub struct NetNode {
    pub address: Address,
    pub service: Arc<DposConsensusService>,
    pub bus: Arc<InMemoryEventBus>,
}

impl NetNode {
    pub fn last_leader_change(&self) -> Option<LeaderChangeNotify> {
        self.bus.leader_changes().pop()
    }

    pub fn pos_finished(&self) -> Vec<PosFinishedNotify> {
        self.bus
            .get_events()
            .into_iter()
            .filter_map(|event| match event {
                ConsensusEvent::PosFinished(notify) => Some(notify),
                _ => None,
            })
            .collect()
    }
}

pub struct TestNetwork {
    pub nodes: Vec<NetNode>,
    pub hub: Arc<Hub>,
    pub chain: Arc<StaticChain>,
    pub election: Arc<StaticElection>,
    pub txs: Arc<SharedTxPool>,
    pub clock: Arc<TokioClock>,
    pub parent: BlockHeader,
    pump: JoinHandle<()>,
}

impl TestNetwork {
    /// Builds `validators` nodes; the clock starts five seconds after the
    /// parent block. Must run inside a tokio runtime.
    pub fn new(validators: u8) -> Self {
        init_tracing();
        let config = ConsensusConfig::default();
        let signers: Vec<Arc<K256Signer>> = (0..validators)
            .map(|i| Arc::new(K256Signer::from_slice(&[i + 1; 32]).expect("valid secret")))
            .collect();
        let addresses: Vec<Address> = signers.iter().map(|s| s.address()).collect();

        let chain = Arc::new(StaticChain::default());
        let election = Arc::new(StaticElection::new(&addresses));
        let txs = Arc::new(SharedTxPool::default());
        let clock = Arc::new(TokioClock::starting_at(PARENT_TIME + 5));
        let parent = BlockHeader {
            number: PARENT_NUMBER,
            timestamp: PARENT_TIME,
            leader: addresses[addresses.len() - 1],
            gas_limit: 10_000_000,
            ..Default::default()
        };
        chain.insert(parent.clone());

        let (hub, rx) = Hub::new();
        let nodes = signers
            .into_iter()
            .map(|signer| {
                let address = signer.address();
                let bus = Arc::new(InMemoryEventBus::new());
                let ports = ConsensusPorts {
                    chain: chain.clone(),
                    election: election.clone(),
                    txs: txs.clone(),
                    execution: Arc::new(DeterministicExecution),
                    quorum: Arc::new(StakeQuorum::new(
                        election.clone(),
                        signer.clone(),
                        config.quorum_percent,
                    )),
                    signer,
                    transport: Arc::new(HubTransport {
                        address,
                        hub: hub.clone(),
                    }),
                    event_bus: bus.clone(),
                    time: clock.clone(),
                };
                let service = DposConsensusService::new(ports, config.clone());
                hub.join(address, Role::Validator, &service);
                NetNode {
                    address,
                    service,
                    bus,
                }
            })
            .collect();
        let pump = tokio::spawn(hub.clone().pump(rx));

        Self {
            nodes,
            hub,
            chain,
            election,
            txs,
            clock,
            parent,
            pump,
        }
    }

    /// Imports the parent on every node, starting consensus one height up.
    pub async fn start_height(&self) {
        for node in &self.nodes {
            node.service
                .handle(ConsensusInput::RoleUpdated(RoleUpdate {
                    role: Role::Validator,
                    header: self.parent.clone(),
                }))
                .await
                .expect("role update accepted");
        }
    }

    pub fn node(&self, address: &Address) -> &NetNode {
        self.nodes
            .iter()
            .find(|n| &n.address == address)
            .expect("node in network")
    }

    /// A proposal on the parent stamped with the current clock.
    pub fn propose(
        &self,
        leader: Address,
        turn: ConsensusTurn,
        txs: &[Transaction],
    ) -> BlockRequest {
        let parent_hash = self.parent.hash();
        let outcome = execute_on(&parent_hash, txs);
        BlockRequest {
            header: BlockHeader {
                parent_hash,
                number: self.parent.number + 1,
                timestamp: self.clock.now(),
                leader,
                gas_limit: self.parent.gas_limit,
                gas_used: outcome.gas_used,
                tx_root: outcome.tx_root,
                receipt_root: outcome.receipt_root,
                state_root: outcome.state_root,
                elect: self.election.entries(),
                net_topology: self.election.net_topology(),
                ..Default::default()
            },
            tx_codes: txs.iter().map(|tx| tx.hash).collect(),
            consensus_turn: turn,
            from: leader,
        }
    }

    /// Hands `request` to its leader as a locally produced block and sends
    /// it to every other validator.
    pub async fn submit(&self, request: BlockRequest, txs: &[Transaction]) {
        for tx in txs {
            self.txs.insert(tx.clone());
        }
        let leader = request.from;
        let outcome = execute_on(&request.header.parent_hash, txs);
        self.node(&leader)
            .service
            .handle(ConsensusInput::LocalRequest(LocalBlockRequest {
                request: request.clone(),
                transactions: txs.to_vec(),
                receipts: outcome.receipts,
            }))
            .await
            .expect("local request accepted");
        self.hub.post(
            leader,
            ConsensusMessage::BlockRequest(request),
            Target::role(Role::Validator),
        );
    }

    /// Polls `cond` every 100ms of tokio time until it holds or `timeout`
    /// passes.
    pub async fn wait_until<F>(&self, timeout: Duration, cond: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if cond(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Drop for TestNetwork {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub fn transaction(seed: u8) -> Transaction {
    Transaction {
        hash: keccak256(&[seed]),
        payload: vec![seed; 8],
    }
}
