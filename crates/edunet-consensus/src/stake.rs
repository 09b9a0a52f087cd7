//! The validator set and stake registry.
//!
//! Validators and stakes live in two separate keyed tables; a stake holds
//! only its validator's id. The `BTreeMap` keying gives a stable id order,
//! which the weighted selection in [`crate::slots`] relies on for
//! determinism.

use crate::{ConsensusError, ConsensusResult};
use edunet_chain::constants::MIN_BLOCK_INTERVAL;
use edunet_crypto::{Hash256, PublicKey};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Reputation below which a validator is deactivated.
const DEACTIVATION_THRESHOLD: u8 = 10;

/// Reputation at or above which a rewarded validator is reactivated.
const REACTIVATION_THRESHOLD: u8 = 50;

/// A registered block producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// Identity: hash of the public key.
    pub id: Hash256,
    /// Key that signs PoS blocks.
    pub public_key: PublicKey,
    /// Current stake in satoshi.
    pub stake_amount: u64,
    /// Unix time of the validator's last produced block, zero if none.
    pub last_block_time: u64,
    /// Reputation score in `[0, 100]`.
    pub reputation: u8,
    /// Whether the validator may currently be selected.
    pub active: bool,
    /// Blocks produced over the validator's lifetime.
    pub blocks_produced: u32,
    /// Slots the validator was assigned but missed.
    pub missed_slots: u32,
}

/// A stake bound to a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeEntry {
    /// Owning validator.
    pub validator_id: Hash256,
    /// Staked amount in satoshi.
    pub amount: u64,
    /// Height at which the stake unlocks.
    pub unlock_height: u32,
    /// Whether the stake is still locked.
    pub locked: bool,
}

impl StakeEntry {
    /// A stake is mature once the chain has reached its unlock height and
    /// the maturity sweep has unlocked it.
    pub fn is_mature(&self, current_height: u32) -> bool {
        !self.locked && current_height >= self.unlock_height
    }
}

/// Validator set, stakes, and the rules binding them.
#[derive(Debug, Clone)]
pub struct StakeRegistry {
    validators: BTreeMap<Hash256, Validator>,
    stakes: BTreeMap<Hash256, StakeEntry>,
    total_stake: u64,
    min_stake: u64,
    maturity_blocks: u32,
}

impl StakeRegistry {
    /// An empty registry with the given admission parameters.
    pub fn new(min_stake: u64, maturity_blocks: u32) -> Self {
        Self {
            validators: BTreeMap::new(),
            stakes: BTreeMap::new(),
            total_stake: 0,
            min_stake,
            maturity_blocks,
        }
    }

    /// Total staked amount across all validators.
    pub fn total_stake(&self) -> u64 {
        self.total_stake
    }

    /// Number of registered validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// True when no validator is registered.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Look up a validator.
    pub fn get(&self, id: &Hash256) -> Option<&Validator> {
        self.validators.get(id)
    }

    /// Look up a stake entry.
    pub fn get_stake(&self, id: &Hash256) -> Option<&StakeEntry> {
        self.stakes.get(id)
    }

    /// Validators in id order.
    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    /// Active validators in id order.
    pub fn active_validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values().filter(|v| v.active)
    }

    /// Number of active validators.
    pub fn active_count(&self) -> usize {
        self.active_validators().count()
    }

    /// Register a validator with an initial stake. The stake locks until
    /// `current_height + maturity_blocks`.
    pub fn add_validator(
        &mut self,
        id: Hash256,
        public_key: PublicKey,
        stake_amount: u64,
        current_height: u32,
    ) -> ConsensusResult<()> {
        if stake_amount < self.min_stake {
            return Err(ConsensusError::StakeBelowMinimum {
                got: stake_amount,
                minimum: self.min_stake,
            });
        }
        if self.validators.contains_key(&id) {
            return Err(ConsensusError::ValidatorExists(id.to_string()));
        }

        let unlock_height = current_height.saturating_add(self.maturity_blocks);
        self.validators.insert(
            id,
            Validator {
                id,
                public_key,
                stake_amount,
                last_block_time: 0,
                reputation: 100,
                active: true,
                blocks_produced: 0,
                missed_slots: 0,
            },
        );
        self.stakes.insert(
            id,
            StakeEntry {
                validator_id: id,
                amount: stake_amount,
                unlock_height,
                locked: true,
            },
        );
        self.total_stake = self.total_stake.saturating_add(stake_amount);

        info!(validator = %id, stake = stake_amount, unlock_height, "Validator registered");
        Ok(())
    }

    /// Change a validator's stake. The stake re-locks for the maturity
    /// period.
    pub fn update_stake(
        &mut self,
        id: &Hash256,
        new_stake: u64,
        current_height: u32,
    ) -> ConsensusResult<()> {
        if new_stake < self.min_stake {
            return Err(ConsensusError::StakeBelowMinimum {
                got: new_stake,
                minimum: self.min_stake,
            });
        }
        let validator = self
            .validators
            .get_mut(id)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(id.to_string()))?;
        let stake = self
            .stakes
            .get_mut(id)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(id.to_string()))?;

        self.total_stake = self.total_stake - stake.amount + new_stake;
        validator.stake_amount = new_stake;
        stake.amount = new_stake;
        stake.unlock_height = current_height.saturating_add(self.maturity_blocks);
        stake.locked = true;

        debug!(validator = %id, stake = new_stake, "Stake updated");
        Ok(())
    }

    /// Remove a validator. Only permitted once its stake has reached its
    /// unlock height.
    pub fn remove_validator(&mut self, id: &Hash256, current_height: u32) -> ConsensusResult<()> {
        if !self.validators.contains_key(id) {
            return Err(ConsensusError::ValidatorUnknown(id.to_string()));
        }
        let stake = self
            .stakes
            .get(id)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(id.to_string()))?;
        if current_height < stake.unlock_height {
            return Err(ConsensusError::StakeLocked {
                unlock_height: stake.unlock_height,
                current_height,
            });
        }

        let amount = stake.amount;
        self.stakes.remove(id);
        self.validators.remove(id);
        self.total_stake = self.total_stake.saturating_sub(amount);

        info!(validator = %id, returned_stake = amount, "Validator removed");
        Ok(())
    }

    /// Unlock every stake whose unlock height has been reached. Called on
    /// every connected block.
    pub fn update_stake_maturity(&mut self, current_height: u32) {
        for stake in self.stakes.values_mut() {
            if stake.locked && current_height >= stake.unlock_height {
                stake.locked = false;
                debug!(validator = %stake.validator_id, height = current_height, "Stake matured");
            }
        }
    }

    /// Record a produced block for a validator.
    pub fn record_block_produced(&mut self, id: &Hash256, block_time: u64) {
        if let Some(validator) = self.validators.get_mut(id) {
            validator.last_block_time = block_time;
            validator.blocks_produced += 1;
        }
    }

    /// Apply a reputation penalty and count a missed slot. Reputation
    /// below the deactivation threshold turns the validator off.
    pub fn penalize(&mut self, id: &Hash256, points: u8) {
        if let Some(validator) = self.validators.get_mut(id) {
            validator.reputation = validator.reputation.saturating_sub(points);
            validator.missed_slots += 1;
            if validator.reputation < DEACTIVATION_THRESHOLD {
                validator.active = false;
                warn!(validator = %id, reputation = validator.reputation, "Validator deactivated");
            }
        }
    }

    /// Apply a reputation reward. Reaching the reactivation threshold
    /// turns an inactive validator back on.
    pub fn reward(&mut self, id: &Hash256, points: u8) {
        if let Some(validator) = self.validators.get_mut(id) {
            validator.reputation = validator.reputation.saturating_add(points).min(100);
            if validator.reputation >= REACTIVATION_THRESHOLD && !validator.active {
                validator.active = true;
                info!(validator = %id, reputation = validator.reputation, "Validator reactivated");
            }
        }
    }

    /// Whether a validator may produce a block at `slot_time`: it must be
    /// active, its stake mature, and at least `MIN_BLOCK_INTERVAL` seconds
    /// past its previous block.
    pub fn is_eligible(&self, id: &Hash256, slot_time: u64, current_height: u32) -> bool {
        let Some(validator) = self.validators.get(id) else {
            return false;
        };
        if !validator.active {
            return false;
        }
        let Some(stake) = self.stakes.get(id) else {
            return false;
        };
        if !stake.is_mature(current_height) {
            return false;
        }
        validator.last_block_time == 0
            || slot_time >= validator.last_block_time + MIN_BLOCK_INTERVAL
    }

    /// Selection weight of a validator at `slot_time`: stake share scaled
    /// by reputation, rotation pressure, and missed-slot activity.
    pub fn selection_weight(&self, validator: &Validator, slot_time: u64) -> f64 {
        if self.total_stake == 0 {
            return 0.0;
        }
        let stake_weight = validator.stake_amount as f64 / self.total_stake as f64;
        let reputation_factor = 0.5 + f64::from(validator.reputation) / 100.0;
        let time_factor = if validator.last_block_time > 0 && slot_time > validator.last_block_time
        {
            (1.0 + (slot_time - validator.last_block_time) as f64 / 3600.0).min(2.0)
        } else {
            1.0
        };
        let activity_factor = (1.0 - f64::from(validator.missed_slots) * 0.1).max(0.1);

        stake_weight * reputation_factor * time_factor * activity_factor
    }
}
