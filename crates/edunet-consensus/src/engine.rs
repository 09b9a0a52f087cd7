//! The hybrid PoW/PoS consensus engine.
//!
//! One readers-writers lock guards the UTXO set and consensus state
//! together; reads take the shared side, tip updates the exclusive side.
//! Ingestion is serialized by a dedicated mutex and never performs storage
//! I/O while holding the state lock: validation runs against cloned
//! snapshots, the storage batch is committed, and only then is the new
//! state swapped in (an in-memory step that cannot fail). A rejected block
//! therefore leaves both memory and storage byte-identical.

use crate::fork::{trace_fork, ForkInfo};
use crate::slots::{self, BlockSlot};
use crate::validation::BlockValidator;
use crate::{
    ConsensusConfig, ConsensusError, ConsensusResult, ScriptVerifier, StakeRegistry, Validator,
};
use edunet_chain::constants::{block_subsidy, GENESIS_BITS};
use edunet_chain::{compact, Block, OutPoint, PosSeal, Transaction};
use edunet_crypto::{derive_public_key, ecdsa_sign, ecdsa_verify, Hash256, PrivateKey, PublicKey};
use edunet_mining::PowMiner;
use edunet_state::{BlockUndo, ChainStore, UtxoEntry, UtxoSet};
use edunet_storage::{Storage, WriteBatch};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};

use crate::difficulty::DifficultyController;

/// Blocks remembered for the PoW/PoS ratio window.
const KIND_WINDOW: usize = 100;

/// How an ingested block changed the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSelection {
    /// The block extended the best chain.
    Extended,
    /// The block was already known; nothing changed.
    Ignored,
    /// The block was stored on a side branch with less work.
    SideChain,
    /// The block's branch outweighed the main chain and replaced it.
    Reorganized {
        /// Height of the last common block.
        fork_height: u32,
        /// Blocks rolled back from the old main chain.
        disconnected: u32,
        /// Blocks applied from the new branch.
        connected: u32,
    },
}

/// Point-in-time network figures.
#[derive(Debug, Clone)]
pub struct NetworkStats {
    /// Registered validators.
    pub total_validators: usize,
    /// Validators currently selectable.
    pub active_validators: usize,
    /// Total staked satoshi.
    pub total_stake: u64,
    /// PoW blocks in the recent window.
    pub pow_blocks_recent: u32,
    /// PoS blocks in the recent window.
    pub pos_blocks_recent: u32,
    /// Mean spacing of the last few blocks, in seconds.
    pub average_block_time: f64,
    /// Compact difficulty of the chain tip.
    pub current_bits: u32,
    /// Difficulty of the chain tip as a float.
    pub current_difficulty: f64,
    /// Current chain height.
    pub height: u32,
}

/// Everything guarded by the engine's single state lock.
struct ChainInner {
    initialized: bool,
    height: u32,
    best_block_hash: Hash256,
    cumulative_work: BigUint,
    current_bits: u32,
    utxo: UtxoSet,
    registry: StakeRegistry,
    /// Recent block kinds, newest last; `true` marks a PoW block.
    recent_kinds: VecDeque<bool>,
}

impl ChainInner {
    fn pow_ratio(&self) -> f64 {
        if self.recent_kinds.is_empty() {
            return 1.0;
        }
        let pow = self.recent_kinds.iter().filter(|&&k| k).count();
        pow as f64 / self.recent_kinds.len() as f64
    }

    fn push_kind(&mut self, is_pow: bool) {
        if self.recent_kinds.len() == KIND_WINDOW {
            self.recent_kinds.pop_front();
        }
        self.recent_kinds.push_back(is_pow);
    }
}

/// The consensus engine: block production, ingestion, validator
/// management and fork resolution over a pluggable store.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    difficulty: DifficultyController,
    chain: ChainStore,
    script: Arc<dyn ScriptVerifier>,
    miner: PowMiner,
    inner: RwLock<ChainInner>,
    /// Serializes ingestion; at most one ingest is in flight.
    ingest_lock: Mutex<()>,
}

impl ConsensusEngine {
    /// Build an engine over a storage backend.
    pub fn new(
        storage: Arc<dyn Storage>,
        config: ConsensusConfig,
        script: Arc<dyn ScriptVerifier>,
    ) -> Self {
        let registry =
            StakeRegistry::new(config.min_stake_amount, config.stake_maturity_blocks);
        let miner = PowMiner::new(config.worker_count);
        Self {
            config,
            difficulty: DifficultyController::new(),
            chain: ChainStore::new(storage),
            script,
            miner,
            inner: RwLock::new(ChainInner {
                initialized: false,
                height: 0,
                best_block_hash: Hash256::zero(),
                cumulative_work: BigUint::zero(),
                current_bits: GENESIS_BITS,
                utxo: UtxoSet::new(),
                registry,
                recent_kinds: VecDeque::new(),
            }),
            ingest_lock: Mutex::new(()),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    // ==================== Genesis ====================

    /// Create, apply and persist the genesis block. Must be called exactly
    /// once before any other chain operation.
    pub fn initialize_genesis(&self, message: &str) -> ConsensusResult<Block> {
        let _guard = self.ingest_lock.lock();
        if self.inner.read().initialized {
            return Err(ConsensusError::StateInconsistent(
                "genesis already initialized".into(),
            ));
        }

        let block = Block::genesis(message);
        let mut utxo = UtxoSet::new();
        let mut undo = BlockUndo::new(0);
        undo.tx_undos
            .push(utxo.apply_transaction(&block.transactions[0], 0)?);

        let created: Vec<UtxoEntry> = utxo.iter().cloned().collect();
        let mut batch = WriteBatch::new();
        self.chain.connect_block_batched(&mut batch, &block, &undo);
        self.chain.apply_utxo_delta_batched(&mut batch, &[], &created);
        self.chain
            .set_best_block_batched(&mut batch, &block.hash(), 0);
        self.chain.write_batch(batch)?;

        let mut inner = self.inner.write();
        inner.initialized = true;
        inner.height = 0;
        inner.best_block_hash = block.hash();
        inner.cumulative_work = compact::work(GENESIS_BITS);
        inner.current_bits = GENESIS_BITS;
        inner.utxo = utxo;
        inner.push_kind(true);
        drop(inner);

        info!(hash = %block.hash(), "Genesis initialized");
        Ok(block)
    }

    // ==================== Ingestion ====================

    /// Ingest a block: extend the best chain, or store it on a side
    /// branch and reorganize when that branch carries more work.
    #[instrument(skip(self, block), fields(hash = %block.hash()))]
    pub fn ingest_block(&self, block: Block) -> ConsensusResult<ChainSelection> {
        let _guard = self.ingest_lock.lock();

        let (initialized, tip_hash, tip_height) = {
            let inner = self.inner.read();
            (inner.initialized, inner.best_block_hash, inner.height)
        };
        if !initialized {
            return Err(ConsensusError::StateInconsistent(
                "genesis not initialized".into(),
            ));
        }

        if self.chain.has_block(&block.hash())? {
            debug!(hash = %block.hash(), "Duplicate block ignored");
            return Ok(ChainSelection::Ignored);
        }

        if block.header.prev_block_hash == tip_hash {
            self.connect_tip(block, tip_hash, tip_height)
        } else {
            self.handle_side_block(block, tip_height)
        }
    }

    /// Validate and connect a block that extends the current tip.
    fn connect_tip(
        &self,
        mut block: Block,
        tip_hash: Hash256,
        tip_height: u32,
    ) -> ConsensusResult<ChainSelection> {
        let height = tip_height + 1;
        block.header.height = height;

        // Clone the state to validate against; the live set is untouched
        // until commit.
        let (mut utxo, mut registry, pow_ratio, current_bits, cumulative_work) = {
            let inner = self.inner.read();
            (
                inner.utxo.clone(),
                inner.registry.clone(),
                inner.pow_ratio(),
                inner.current_bits,
                inner.cumulative_work.clone(),
            )
        };

        let hybrid = height >= self.config.pos_activation_height;
        let expected_bits =
            self.expected_bits_for(height, current_bits, hybrid.then_some(pow_ratio))?;
        let prev_timestamps = self.recent_timestamps(tip_height)?;

        let seal = block.pos_seal();
        let is_pow = seal.is_none();
        if let Some(seal) = &seal {
            self.check_pos_seal(&block, seal, &registry, &tip_hash, tip_height)?;
        }

        let validated = BlockValidator::new(self.script.as_ref()).validate_block(
            &block,
            &prev_timestamps,
            expected_bits,
            &mut utxo,
            unix_now(),
            is_pow,
        )?;

        if let Some(seal) = &seal {
            registry
                .record_block_produced(&seal.validator_id, u64::from(block.header.timestamp));
        }
        registry.update_stake_maturity(height);

        // Persist first (no state lock held), then commit memory.
        let (spent, created) = utxo_delta(&block, &validated.undo, &utxo);
        let mut batch = WriteBatch::new();
        self.chain
            .connect_block_batched(&mut batch, &block, &validated.undo);
        self.chain
            .apply_utxo_delta_batched(&mut batch, &spent, &created);
        self.chain
            .set_best_block_batched(&mut batch, &block.hash(), height);
        self.chain.write_batch(batch)?;

        let block_work = compact::work(block.header.n_bits);
        let mut inner = self.inner.write();
        inner.height = height;
        inner.best_block_hash = block.hash();
        inner.cumulative_work = cumulative_work + block_work;
        inner.current_bits = block.header.n_bits;
        inner.utxo = utxo;
        inner.registry = registry;
        inner.push_kind(is_pow);
        drop(inner);

        info!(height, hash = %block.hash(), is_pow, "Chain extended");
        Ok(ChainSelection::Extended)
    }

    /// Store a block on a side branch and reorganize if that branch now
    /// outweighs the main chain.
    fn handle_side_block(
        &self,
        mut block: Block,
        tip_height: u32,
    ) -> ConsensusResult<ChainSelection> {
        let parent = self
            .chain
            .get_block_by_hash(&block.header.prev_block_hash)?
            .ok_or_else(|| {
                ConsensusError::OrphanBlock(block.header.prev_block_hash.to_string())
            })?;
        block.header.height = parent.header.height + 1;
        self.chain.put_block(&block)?;

        let (registry, hybrid_active) = {
            let inner = self.inner.read();
            (
                inner.registry.clone(),
                tip_height >= self.config.pos_activation_height,
            )
        };

        let fork = trace_fork(&self.chain, &block, tip_height, &registry, hybrid_active)?;
        if fork.alt_is_heavier() {
            self.reorganize(fork)
        } else {
            debug!(
                height = block.header.height,
                hash = %block.hash(),
                "Block stored on lighter side chain"
            );
            Ok(ChainSelection::SideChain)
        }
    }

    /// Replace the main chain above the fork point with the alternative
    /// branch. Runs entirely on cloned state and a single storage batch;
    /// any failure leaves the original chain untouched.
    fn reorganize(&self, fork: ForkInfo) -> ConsensusResult<ChainSelection> {
        warn!(
            fork_height = fork.fork_height,
            disconnecting = fork.main_chain.len(),
            connecting = fork.alt_chain.len(),
            main_work = %fork.main_work,
            alt_work = %fork.alt_work,
            "Chain reorganization"
        );

        let (mut utxo, mut registry, mut cumulative_work) = {
            let inner = self.inner.read();
            (
                inner.utxo.clone(),
                inner.registry.clone(),
                inner.cumulative_work.clone(),
            )
        };

        let mut batch = WriteBatch::new();

        // Disconnect the old main chain in reverse order.
        for block in fork.main_chain.iter().rev() {
            let undo = self
                .chain
                .get_undo(block.header.height)?
                .ok_or_else(|| {
                    ConsensusError::ReorgFailed(format!(
                        "missing undo data for height {}",
                        block.header.height
                    ))
                })?;
            utxo.rollback_block(&block.transactions, &undo)
                .map_err(|e| ConsensusError::ReorgFailed(e.to_string()))?;
            self.chain.disconnect_block_batched(&mut batch, block);
            self.chain.rollback_utxo_delta_batched(&mut batch, block, &undo);
            cumulative_work -= compact::work(block.header.n_bits);
        }
        let mut current_bits = if fork.fork_height == 0 {
            GENESIS_BITS
        } else {
            self.block_time_and_bits_at(fork.fork_height, &fork)?.1
        };

        // Connect and fully revalidate the alternative branch in order.
        // The PoW/PoS window is rebuilt afterwards, so retargets inside
        // the branch use the plain rule.
        let mut parent_hash = fork.fork_point;
        for alt_block in &fork.alt_chain {
            let height = alt_block.header.height;
            let expected_bits =
                self.expected_bits_in_reorg(height, current_bits, None, &fork)?;

            let prev_timestamps = self.reorg_timestamps(height, &fork)?;
            let seal = alt_block.pos_seal();
            if let Some(seal) = &seal {
                self.check_pos_seal(alt_block, seal, &registry, &parent_hash, height - 1)?;
            }

            let validated = BlockValidator::new(self.script.as_ref())
                .validate_block(
                    alt_block,
                    &prev_timestamps,
                    expected_bits,
                    &mut utxo,
                    unix_now(),
                    seal.is_none(),
                )
                .map_err(|e| {
                    ConsensusError::ReorgFailed(format!(
                        "branch block at height {height} invalid: {e}"
                    ))
                })?;

            if let Some(seal) = &seal {
                registry.record_block_produced(
                    &seal.validator_id,
                    u64::from(alt_block.header.timestamp),
                );
            }
            registry.update_stake_maturity(height);

            let (spent, created) = utxo_delta(alt_block, &validated.undo, &utxo);
            self.chain
                .connect_block_batched(&mut batch, alt_block, &validated.undo);
            self.chain
                .apply_utxo_delta_batched(&mut batch, &spent, &created);

            cumulative_work += compact::work(alt_block.header.n_bits);
            current_bits = alt_block.header.n_bits;
            parent_hash = alt_block.hash();
        }

        let new_tip = fork
            .alt_chain
            .last()
            .ok_or_else(|| ConsensusError::ReorgFailed("empty branch".into()))?;
        let new_height = new_tip.header.height;
        self.chain
            .set_best_block_batched(&mut batch, &new_tip.hash(), new_height);
        self.chain.write_batch(batch)?;

        // Rebuild the PoW/PoS window from the new chain.
        let recent_kinds = self.rebuild_kind_window(new_height)?;

        let mut inner = self.inner.write();
        inner.height = new_height;
        inner.best_block_hash = new_tip.hash();
        inner.cumulative_work = cumulative_work;
        inner.current_bits = current_bits;
        inner.utxo = utxo;
        inner.registry = registry;
        inner.recent_kinds = recent_kinds;
        drop(inner);

        info!(
            new_height,
            new_tip = %new_tip.hash(),
            "Reorganization complete"
        );
        Ok(ChainSelection::Reorganized {
            fork_height: fork.fork_height,
            disconnected: fork.main_chain.len() as u32,
            connected: fork.alt_chain.len() as u32,
        })
    }

    // ==================== Block production ====================

    /// Assemble an unmined block template on the current tip. The
    /// coinbase pays the height's subsidy (scaled for PoS production)
    /// plus the fees of the included transactions.
    pub fn build_template(
        &self,
        recipient_script: Vec<u8>,
        transactions: Vec<Transaction>,
        timestamp: u32,
        pos: bool,
    ) -> ConsensusResult<Block> {
        let (tip_hash, tip_height, current_bits, pow_ratio, fees) = {
            let inner = self.inner.read();
            if !inner.initialized {
                return Err(ConsensusError::StateInconsistent(
                    "genesis not initialized".into(),
                ));
            }
            let mut fees = 0u64;
            for tx in &transactions {
                fees = fees
                    .checked_add(transaction_fee(&inner.utxo, tx)?)
                    .ok_or_else(|| {
                        ConsensusError::StructureInvalid("fee sum overflow".into())
                    })?;
            }
            (
                inner.best_block_hash,
                inner.height,
                inner.current_bits,
                inner.pow_ratio(),
                fees,
            )
        };

        let height = tip_height + 1;
        let hybrid = height >= self.config.pos_activation_height;
        let n_bits = self.expected_bits_for(height, current_bits, hybrid.then_some(pow_ratio))?;
        let reward = self
            .block_reward(height, !pos)
            .saturating_add(fees);

        Ok(Block::build_template(
            tip_hash,
            height,
            n_bits,
            timestamp,
            reward,
            recipient_script,
            transactions,
        ))
    }

    /// Mine a template with the PoW worker pool and return the sealed
    /// block. Exhausting `max_iterations` without a solution is an error;
    /// no state changes either way.
    pub fn mine_pow(&self, template: &Block, max_iterations: u64) -> ConsensusResult<Block> {
        let result = if self.miner.worker_count() > 1 {
            self.miner.mine_parallel(&template.header, max_iterations)
        } else {
            self.miner.mine(&template.header, max_iterations)
        }
        .map_err(|e| ConsensusError::Mining(e.to_string()))?;

        if !result.success {
            return Err(ConsensusError::Mining(format!(
                "no nonce after {} iterations",
                result.iterations
            )));
        }

        let mut block = template.clone();
        block.header.nonce = result.nonce;
        block.clear_cache();
        debug!(
            nonce = result.nonce,
            iterations = result.iterations,
            "Template sealed by PoW"
        );
        Ok(block)
    }

    /// Cancel any in-flight mining cooperatively.
    pub fn stop_mining(&self) {
        self.miner.stop_mining();
    }

    /// Produce a PoS block: verify the validator is eligible and selected
    /// for the template's slot, then seal the template with its signature
    /// over the header hash.
    pub fn produce_pos(
        &self,
        validator_id: &Hash256,
        private_key: &PrivateKey,
        template: &Block,
    ) -> ConsensusResult<Block> {
        {
            let inner = self.inner.read();
            let validator = inner
                .registry
                .get(validator_id)
                .ok_or_else(|| ConsensusError::PosValidatorUnknown(validator_id.to_string()))?;
            if derive_public_key(private_key) != validator.public_key {
                return Err(ConsensusError::PosSignatureInvalid(
                    "private key does not match validator".into(),
                ));
            }
            if template.header.prev_block_hash != inner.best_block_hash {
                return Err(ConsensusError::StateInconsistent(
                    "template does not build on the current tip".into(),
                ));
            }
            let slot_time = u64::from(template.header.timestamp);
            if !inner
                .registry
                .is_eligible(validator_id, slot_time, inner.height)
            {
                return Err(ConsensusError::PosValidatorIneligible(
                    validator_id.to_string(),
                ));
            }
            let selected = slots::select_validator(
                &inner.registry,
                slot_time,
                &inner.best_block_hash,
                inner.height,
            );
            if selected != Some(*validator_id) {
                return Err(ConsensusError::PosValidatorIneligible(format!(
                    "{validator_id} is not selected for this slot"
                )));
            }
        }

        let mut block = template.clone();
        let signature = ecdsa_sign(&block.header.hash(), private_key);
        block.set_pos_seal(&PosSeal {
            validator_id: *validator_id,
            signature,
        });
        Ok(block)
    }

    /// Block reward for a height: the subsidy, scaled to 80% for PoS
    /// production.
    pub fn block_reward(&self, height: u32, is_pow: bool) -> u64 {
        let base = block_subsidy(height);
        if is_pow {
            base
        } else {
            base * 4 / 5
        }
    }

    // ==================== Validators ====================

    /// Register a validator; the id is the hash of its public key.
    pub fn add_validator(&self, public_key: PublicKey, stake: u64) -> ConsensusResult<Hash256> {
        let mut inner = self.inner.write();
        let height = inner.height;
        let id = public_key.id();
        inner.registry.add_validator(id, public_key, stake, height)?;
        Ok(id)
    }

    /// Change a validator's stake; it re-locks for the maturity period.
    pub fn update_stake(&self, id: &Hash256, new_stake: u64) -> ConsensusResult<()> {
        let mut inner = self.inner.write();
        let height = inner.height;
        inner.registry.update_stake(id, new_stake, height)
    }

    /// Remove a validator whose stake has matured.
    pub fn remove_validator(&self, id: &Hash256) -> ConsensusResult<()> {
        let mut inner = self.inner.write();
        let height = inner.height;
        inner.registry.remove_validator(id, height)
    }

    /// Penalize a validator's reputation and record a missed slot.
    pub fn penalize_validator(&self, id: &Hash256, points: u8) {
        self.inner.write().registry.penalize(id, points);
    }

    /// Reward a validator's reputation.
    pub fn reward_validator(&self, id: &Hash256, points: u8) {
        self.inner.write().registry.reward(id, points);
    }

    /// Snapshot of one validator.
    pub fn validator(&self, id: &Hash256) -> Option<Validator> {
        self.inner.read().registry.get(id).cloned()
    }

    /// Snapshot of all active validators.
    pub fn active_validators(&self) -> Vec<Validator> {
        self.inner
            .read()
            .registry
            .active_validators()
            .cloned()
            .collect()
    }

    /// Deterministic validator selection for a slot at the current tip.
    pub fn select_validator(&self, slot_time: u64) -> Option<Hash256> {
        let inner = self.inner.read();
        slots::select_validator(
            &inner.registry,
            slot_time,
            &inner.best_block_hash,
            inner.height,
        )
    }

    /// Upcoming production slots from `from_time`.
    pub fn upcoming_slots(&self, from_time: u64, count: u32) -> Vec<BlockSlot> {
        let inner = self.inner.read();
        slots::generate_slots(
            &inner.registry,
            from_time,
            count,
            inner.height,
            &inner.best_block_hash,
            self.config.pos_activation_height,
        )
    }

    // ==================== Queries ====================

    /// Current chain height.
    pub fn height(&self) -> u32 {
        self.inner.read().height
    }

    /// Hash of the best block.
    pub fn best_block_hash(&self) -> Hash256 {
        self.inner.read().best_block_hash
    }

    /// Cumulative work of the best chain.
    pub fn cumulative_work(&self) -> BigUint {
        self.inner.read().cumulative_work.clone()
    }

    /// Compact difficulty at the tip.
    pub fn current_bits(&self) -> u32 {
        self.inner.read().current_bits
    }

    /// Override the current difficulty. Intended for private networks and
    /// tests; rejects encodings that do not expand to a valid target.
    pub fn set_difficulty_bits(&self, n_bits: u32) -> ConsensusResult<()> {
        if compact::compact_to_target(n_bits).is_none() {
            return Err(ConsensusError::StructureInvalid(format!(
                "invalid compact target {n_bits:#010x}"
            )));
        }
        self.inner.write().current_bits = n_bits;
        Ok(())
    }

    /// Clone of the current UTXO set.
    pub fn utxo_snapshot(&self) -> UtxoSet {
        self.inner.read().utxo.clone()
    }

    /// Typed access to stored chain records.
    pub fn chain_store(&self) -> &ChainStore {
        &self.chain
    }

    /// Re-verify the stored main chain from genesis to the tip: parent
    /// links, Merkle roots, and proof of work for unsealed blocks. Reads
    /// only; useful after recovery from persistent storage.
    pub fn verify_chain(&self) -> ConsensusResult<()> {
        let tip_height = self.height();
        let mut prev_hash = None;

        for height in 0..=tip_height {
            let block = self
                .chain
                .get_block_by_height(height)?
                .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {height}")))?;

            if let Some(prev) = prev_hash {
                if block.header.prev_block_hash != prev {
                    return Err(ConsensusError::StateInconsistent(format!(
                        "broken parent link at height {height}"
                    )));
                }
            }

            let computed = block.compute_merkle_root();
            if block.header.merkle_root != computed {
                return Err(ConsensusError::MerkleMismatch {
                    header: block.header.merkle_root.to_string(),
                    computed: computed.to_string(),
                });
            }

            // Genesis is anchored by definition; PoS blocks by signature.
            if height > 0 && block.pos_seal().is_none() && !block.header.meets_target() {
                return Err(ConsensusError::PowInsufficient {
                    hash: block.hash().to_string(),
                    n_bits: block.header.n_bits,
                });
            }

            prev_hash = Some(block.hash());
        }

        debug!(tip_height, "Chain verified");
        Ok(())
    }

    /// Aggregate network statistics.
    pub fn network_stats(&self) -> ConsensusResult<NetworkStats> {
        let (height, current_bits, pow, pos, total_validators, active_validators, total_stake) = {
            let inner = self.inner.read();
            let pow = inner.recent_kinds.iter().filter(|&&k| k).count() as u32;
            let pos = inner.recent_kinds.len() as u32 - pow;
            (
                inner.height,
                inner.current_bits,
                pow,
                pos,
                inner.registry.len(),
                inner.registry.active_count(),
                inner.registry.total_stake(),
            )
        };

        let average_block_time = self.average_block_time(height)?;
        Ok(NetworkStats {
            total_validators,
            active_validators,
            total_stake,
            pow_blocks_recent: pow,
            pos_blocks_recent: pos,
            average_block_time,
            current_bits,
            current_difficulty: compact::difficulty(current_bits),
            height,
        })
    }

    // ==================== Internals ====================

    /// Difficulty expected at `height`: the retarget value on interval
    /// boundaries (hybrid-adjusted when a PoW ratio is supplied), the
    /// current bits otherwise.
    fn expected_bits_for(
        &self,
        height: u32,
        current_bits: u32,
        pow_ratio: Option<f64>,
    ) -> ConsensusResult<u32> {
        if height == 0 {
            return Ok(GENESIS_BITS);
        }
        if !self.difficulty.should_retarget(height) {
            return Ok(current_bits);
        }

        let span = {
            let last = self
                .chain
                .get_block_by_height(height - 1)?
                .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {}", height - 1)))?;
            let first_height = height - self.difficulty.interval();
            let first = self
                .chain
                .get_block_by_height(first_height)?
                .ok_or_else(|| {
                    ConsensusError::BlockNotFound(format!("height {first_height}"))
                })?;
            u64::from(last.header.timestamp.saturating_sub(first.header.timestamp))
        };

        Ok(match pow_ratio {
            Some(ratio) => self.difficulty.hybrid_retarget(
                current_bits,
                span,
                ratio,
                self.config.pow_target_ratio,
            ),
            None => self.difficulty.retarget(current_bits, span),
        })
    }

    /// Same as [`Self::expected_bits_for`], resolving timestamps through
    /// the in-flight branch during a reorganization.
    fn expected_bits_in_reorg(
        &self,
        height: u32,
        current_bits: u32,
        pow_ratio: Option<f64>,
        fork: &ForkInfo,
    ) -> ConsensusResult<u32> {
        if height == 0 {
            return Ok(GENESIS_BITS);
        }
        if !self.difficulty.should_retarget(height) {
            return Ok(current_bits);
        }

        let last = self.block_time_and_bits_at(height - 1, fork)?.0;
        let first = self
            .block_time_and_bits_at(height - self.difficulty.interval(), fork)?
            .0;
        let span = u64::from(last.saturating_sub(first));

        Ok(match pow_ratio {
            Some(ratio) => self.difficulty.hybrid_retarget(
                current_bits,
                span,
                ratio,
                self.config.pow_target_ratio,
            ),
            None => self.difficulty.retarget(current_bits, span),
        })
    }

    /// Timestamp and bits of the new-chain block at `height` during a
    /// reorganization: branch blocks override the stored height index
    /// above the fork point.
    fn block_time_and_bits_at(&self, height: u32, fork: &ForkInfo) -> ConsensusResult<(u32, u32)> {
        if height > fork.fork_height {
            let offset = (height - fork.fork_height - 1) as usize;
            let block = fork.alt_chain.get(offset).ok_or_else(|| {
                ConsensusError::BlockNotFound(format!("branch height {height}"))
            })?;
            Ok((block.header.timestamp, block.header.n_bits))
        } else {
            let block = self
                .chain
                .get_block_by_height(height)?
                .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {height}")))?;
            Ok((block.header.timestamp, block.header.n_bits))
        }
    }

    /// Timestamps of up to the last 11 main-chain blocks ending at
    /// `tip_height`, oldest first.
    fn recent_timestamps(&self, tip_height: u32) -> ConsensusResult<Vec<u32>> {
        let from = tip_height.saturating_sub(10);
        let mut timestamps = Vec::with_capacity(11);
        for height in from..=tip_height {
            let block = self
                .chain
                .get_block_by_height(height)?
                .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {height}")))?;
            timestamps.push(block.header.timestamp);
        }
        Ok(timestamps)
    }

    /// Timestamps of the 11 blocks below `height` on the post-reorg
    /// chain, oldest first.
    fn reorg_timestamps(&self, height: u32, fork: &ForkInfo) -> ConsensusResult<Vec<u32>> {
        if height == 0 {
            return Ok(Vec::new());
        }
        let tip = height - 1;
        let from = tip.saturating_sub(10);
        let mut timestamps = Vec::with_capacity(11);
        for h in from..=tip {
            timestamps.push(self.block_time_and_bits_at(h, fork)?.0);
        }
        Ok(timestamps)
    }

    /// Verify a PoS seal: known validator, eligible for the slot,
    /// actually selected for it, and a valid signature over the header
    /// hash.
    fn check_pos_seal(
        &self,
        block: &Block,
        seal: &PosSeal,
        registry: &StakeRegistry,
        prev_hash: &Hash256,
        eligibility_height: u32,
    ) -> ConsensusResult<()> {
        let validator = registry
            .get(&seal.validator_id)
            .ok_or_else(|| ConsensusError::PosValidatorUnknown(seal.validator_id.to_string()))?;

        let slot_time = u64::from(block.header.timestamp);
        if !registry.is_eligible(&seal.validator_id, slot_time, eligibility_height) {
            return Err(ConsensusError::PosValidatorIneligible(
                seal.validator_id.to_string(),
            ));
        }
        let selected = slots::select_validator(registry, slot_time, prev_hash, eligibility_height);
        if selected != Some(seal.validator_id) {
            return Err(ConsensusError::PosValidatorIneligible(format!(
                "{} was not selected for slot {slot_time}",
                seal.validator_id
            )));
        }
        if !ecdsa_verify(&block.header.hash(), &seal.signature, &validator.public_key) {
            return Err(ConsensusError::PosSignatureInvalid(
                seal.validator_id.to_string(),
            ));
        }
        Ok(())
    }

    /// Recompute the PoW/PoS window by walking the last blocks of the
    /// (new) main chain.
    fn rebuild_kind_window(&self, tip_height: u32) -> ConsensusResult<VecDeque<bool>> {
        let from = tip_height.saturating_sub(KIND_WINDOW as u32 - 1);
        let mut kinds = VecDeque::with_capacity(KIND_WINDOW);
        for height in from..=tip_height {
            let block = self
                .chain
                .get_block_by_height(height)?
                .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {height}")))?;
            kinds.push_back(block.pos_seal().is_none());
        }
        Ok(kinds)
    }

    /// Mean spacing over up to the last ten block intervals.
    fn average_block_time(&self, tip_height: u32) -> ConsensusResult<f64> {
        if tip_height == 0 {
            return Ok(0.0);
        }
        let from = tip_height.saturating_sub(10);
        let first = self
            .chain
            .get_block_by_height(from)?
            .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {from}")))?;
        let last = self
            .chain
            .get_block_by_height(tip_height)?
            .ok_or_else(|| ConsensusError::BlockNotFound(format!("height {tip_height}")))?;
        let intervals = (tip_height - from) as f64;
        Ok(f64::from(last.header.timestamp.saturating_sub(first.header.timestamp)) / intervals)
    }
}

/// Current Unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Fee a transaction pays against a UTXO view.
fn transaction_fee(utxo: &UtxoSet, tx: &Transaction) -> ConsensusResult<u64> {
    let mut input_value = 0u64;
    for input in &tx.inputs {
        let entry = utxo
            .get(&input.prev)
            .ok_or_else(|| ConsensusError::UtxoMissing(input.prev.to_string()))?;
        input_value = input_value
            .checked_add(entry.output.value)
            .ok_or_else(|| ConsensusError::StructureInvalid("input sum overflow".into()))?;
    }
    let output_value = tx
        .total_output_value()
        .ok_or_else(|| ConsensusError::StructureInvalid("output sum overflow".into()))?;
    input_value
        .checked_sub(output_value)
        .ok_or(ConsensusError::OutputOverspend {
            inputs: input_value,
            outputs: output_value,
        })
}

/// Net storage-visible UTXO change of an applied block: entries spent
/// from prior blocks, and created entries still unspent after the block.
fn utxo_delta(
    block: &Block,
    undo: &BlockUndo,
    utxo_after: &UtxoSet,
) -> (Vec<UtxoEntry>, Vec<UtxoEntry>) {
    let in_block: HashSet<OutPoint> = block
        .transactions
        .iter()
        .flat_map(|tx| {
            let txid = tx.txid();
            (0..tx.outputs.len() as u32).map(move |vout| OutPoint::new(txid, vout))
        })
        .collect();

    let spent: Vec<UtxoEntry> = undo
        .tx_undos
        .iter()
        .flat_map(|u| u.spent.iter())
        .filter(|entry| !in_block.contains(&entry.outpoint))
        .cloned()
        .collect();

    let created: Vec<UtxoEntry> = in_block
        .iter()
        .filter_map(|outpoint| utxo_after.get(outpoint))
        .cloned()
        .collect();

    (spent, created)
}
