//! Test doubles shared by the unit tests.

use crate::adapters::{InMemoryEventBus, InMemoryTransport, StakeQuorum};
use crate::domain::{
    BalanceAdjustment, BlockHeader, BlockRequest, BroadcastInterval, ConsensusTurn,
    ElectionEntry, ExecutionOutcome, LeaderTimingConfig, NetTopology, Receipt,
    TopologyEntry, TopologyGraph, TopologyKind, TopologyNode, Transaction,
};
use crate::ports::{
    ChainReader, ConsensusPorts, ElectionSource, ExecutionEngine, SignatureService, TimeSource,
    TxSource,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{keccak256, Address, Hash, Role, Signature};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub fn validator_addr(i: u8) -> Address {
    let mut address = [0u8; 20];
    address[0] = 0xAA;
    address[19] = i;
    address
}

/// Signature layout: signer in bytes 0..20, hash in 20..52, marker 27 in 64.
pub fn mock_signature(signer: &Address, hash: &Hash) -> Signature {
    let mut sig = [0u8; 65];
    sig[..20].copy_from_slice(signer);
    sig[20..52].copy_from_slice(hash);
    sig[64] = 27;
    Signature(sig)
}

pub struct MockSigner {
    address: Address,
}

impl MockSigner {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

impl SignatureService for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, hash: &Hash) -> Result<Signature, String> {
        Ok(mock_signature(&self.address, hash))
    }

    fn recover(&self, hash: &Hash, signature: &Signature) -> Option<Address> {
        let bytes = signature.as_bytes();
        if bytes[64] != 27 || &bytes[20..52] != hash {
            return None;
        }
        let mut address = [0u8; 20];
        address.copy_from_slice(&bytes[..20]);
        Some(address)
    }
}

/// Clock driven by the test, in milliseconds.
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> u64 {
        self.millis.load(Ordering::SeqCst) / 1000
    }

    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockChain {
    headers: RwLock<HashMap<Hash, BlockHeader>>,
}

impl MockChain {
    pub fn insert(&self, header: BlockHeader) {
        self.headers.write().insert(header.hash(), header);
    }
}

impl ChainReader for MockChain {
    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        self.headers.read().get(hash).cloned()
    }

    fn has_state(&self, hash: &Hash) -> bool {
        self.headers.read().contains_key(hash)
    }
}

/// Same validator set for every parent: `validator_addr(0..n)`.
pub struct MockElection {
    graph: TopologyGraph,
    timing: LeaderTimingConfig,
    interval: BroadcastInterval,
}

impl MockElection {
    pub fn new(validators: u8) -> Self {
        let nodes = (0..validators)
            .map(|i| TopologyNode {
                account: validator_addr(i),
                role: Role::Validator,
                position: i as u16,
                stake: 100,
            })
            .collect();
        Self {
            graph: TopologyGraph::new(0, nodes),
            timing: LeaderTimingConfig::default(),
            interval: BroadcastInterval::default(),
        }
    }

    pub fn with_broadcast_node(mut self, account: Address) -> Self {
        self.graph.nodes.push(TopologyNode {
            account,
            role: Role::Broadcast,
            position: 0,
            stake: 0,
        });
        self
    }

    pub fn with_interval(mut self, interval: BroadcastInterval) -> Self {
        self.interval = interval;
        self
    }

    pub fn election_entries(&self) -> Vec<ElectionEntry> {
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

impl ElectionSource for MockElection {
    fn topology_graph(&self, _parent_hash: &Hash) -> Result<TopologyGraph, String> {
        Ok(self.graph.clone())
    }

    fn election_graph(&self, _parent_hash: &Hash) -> Result<Vec<ElectionEntry>, String> {
        Ok(self.election_entries())
    }

    fn expected_topology(&self, _parent_hash: &Hash, _header: &BlockHeader) -> Result<NetTopology, String> {
        Ok(self.net_topology())
    }

    fn leader_config(&self, _parent_hash: &Hash) -> Result<LeaderTimingConfig, String> {
        Ok(self.timing)
    }

    fn broadcast_interval(&self, _parent_hash: &Hash) -> Result<BroadcastInterval, String> {
        Ok(self.interval)
    }
}

#[derive(Default)]
pub struct MockTxSource {
    txs: RwLock<HashMap<Hash, Transaction>>,
    stall: AtomicBool,
}

impl MockTxSource {
    pub fn insert(&self, tx: Transaction) {
        self.txs.write().insert(tx.hash, tx);
    }

    /// Makes every lookup hang.
    pub fn stall(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TxSource for MockTxSource {
    async fn resolve(
        &self,
        _number: u64,
        tx_codes: Vec<Hash>,
        _leader: Address,
        _seq: u64,
    ) -> Result<Vec<Transaction>, String> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
        let txs = self.txs.read();
        tx_codes
            .iter()
            .map(|code| txs.get(code).cloned().ok_or_else(|| "missing transaction".to_string()))
            .collect()
    }
}

/// Deterministic execution: roots derive from the parent and tx hashes.
pub fn mock_outcome(parent_hash: &Hash, txs: &[Transaction]) -> ExecutionOutcome {
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

pub struct MockExecution;

impl ExecutionEngine for MockExecution {
    fn reward_and_slash(&self, _header: &BlockHeader) -> Result<Vec<BalanceAdjustment>, String> {
        Ok(Vec::new())
    }

    fn execute(
        &self,
        header: &BlockHeader,
        transactions: &[Transaction],
        _adjustments: &[BalanceAdjustment],
    ) -> Result<ExecutionOutcome, String> {
        Ok(mock_outcome(&header.parent_hash, transactions))
    }

    fn verify_header(&self, header: &BlockHeader) -> Result<(), String> {
        if header.gas_used > header.gas_limit {
            return Err("gas used above limit".to_string());
        }
        Ok(())
    }
}

/// One node's view: ports plus handles on the doubles behind them.
pub struct TestNode {
    pub ports: ConsensusPorts,
    pub clock: Arc<ManualClock>,
    pub bus: Arc<InMemoryEventBus>,
    pub transport: Arc<InMemoryTransport>,
    pub chain: Arc<MockChain>,
    pub election: Arc<MockElection>,
    pub txs: Arc<MockTxSource>,
}

pub fn test_node(self_index: u8, validators: u8) -> TestNode {
    test_node_with(validator_addr(self_index), MockElection::new(validators))
}

pub fn test_node_with(address: Address, election: MockElection) -> TestNode {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let bus = Arc::new(InMemoryEventBus::new());
    let transport = Arc::new(InMemoryTransport::new());
    let chain = Arc::new(MockChain::default());
    let election = Arc::new(election);
    let txs = Arc::new(MockTxSource::default());
    let signer = Arc::new(MockSigner::new(address));
    let quorum = Arc::new(StakeQuorum::new(election.clone(), signer.clone(), 67));

    let ports = ConsensusPorts {
        chain: chain.clone(),
        election: election.clone(),
        txs: txs.clone(),
        execution: Arc::new(MockExecution),
        quorum,
        signer,
        transport: transport.clone(),
        event_bus: bus.clone(),
        time: clock.clone(),
    };
    TestNode {
        ports,
        clock,
        bus,
        transport,
        chain,
        election,
        txs,
    }
}

/// Parent of height `number + 1`, led by `leader`.
pub fn parent_header(number: u64, timestamp: u64, leader: Address) -> BlockHeader {
    BlockHeader {
        number,
        timestamp,
        leader,
        gas_limit: 10_000_000,
        ..Default::default()
    }
}

/// A proposal on `parent` that verifies against `election`.
pub fn proposal(
    election: &MockElection,
    parent: &BlockHeader,
    leader: Address,
    turn: ConsensusTurn,
    txs: &[Transaction],
) -> BlockRequest {
    let parent_hash = parent.hash();
    let outcome = mock_outcome(&parent_hash, txs);
    BlockRequest {
        header: BlockHeader {
            parent_hash,
            number: parent.number + 1,
            timestamp: parent.timestamp + 5,
            leader,
            gas_limit: parent.gas_limit,
            gas_used: outcome.gas_used,
            tx_root: outcome.tx_root,
            receipt_root: outcome.receipt_root,
            state_root: outcome.state_root,
            elect: election.election_entries(),
            net_topology: election.net_topology(),
            ..Default::default()
        },
        tx_codes: txs.iter().map(|tx| tx.hash).collect(),
        consensus_turn: turn,
        from: leader,
    }
}

pub fn transaction(seed: u8) -> Transaction {
    Transaction {
        hash: keccak256(&[seed]),
        payload: vec![seed; 8],
    }
}
