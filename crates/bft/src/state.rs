//! BFT consensus state machine.
//!
//! This module implements the favobft round protocol as a synchronous,
//! event-driven model. One height is processed at a time:
//!
//! ```text
//! NEW_HEIGHT → PROPOSE → PREPARE → COMMIT → FINALIZED → NEW_HEIGHT (next block)
//!                 └──────────┴─────────┴──→ ROUND_CHANGE → PROPOSE (higher round)
//! ```

use favo_core::{Action, AppliedTransactions, ConsensusMessage, Event, StateMachine, TimerId};
use favo_types::{
    receipts_root, transactions_root, Address, Block, BlockNumber, Checkpoint, Extra, Header,
    KeyPair, LockedBlock, Proposal, Round, RoundChange, ValidatorSet, ValidatorSetDelta, Vote,
    VoteKind,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::accessor::{AccessorError, ChainAccessor};
use crate::boundary::{is_end_of_period, resolve_epoch_end};
use crate::config::{BftConfig, ConfigError, RetryPolicy, MAX_ROUND_LOOKAHEAD};
use crate::round::{RoundState, Step};
use crate::storage::BlockchainBackend;
use crate::validation::{validate_block, BlockContext, ProposalError};
use crate::validators::ValidatorSetManager;
use crate::vote_set::VoteOutcome;

/// BFT statistics for monitoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct BftStats {
    /// Blocks finalized by this node.
    pub blocks_finalized: u64,
    /// Round timeouts observed.
    pub round_timeouts: u64,
    /// Rounds entered through a round-change quorum.
    pub round_changes: u64,
    /// Proposals that failed validation or came from the wrong proposer.
    pub proposals_rejected: u64,
    /// Votes from a validator that already voted differently in the same step.
    pub equivocations: u64,
    /// Messages dropped as stale, invalid, or over the buffer limit.
    pub messages_dropped: u64,
}

/// Startup failures.
#[derive(Debug, Error)]
pub enum BftError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("chain is empty; a genesis block is required")]
    EmptyChain,

    #[error("cannot read chain head: {0}")]
    Head(#[from] AccessorError),
}

/// BFT consensus state machine.
///
/// # State Machine Flow
///
/// 1. **NEW_HEIGHT** → pick up the validator set, start the round timer, and
///    arm the proposal timer if this node proposes round 0
/// 2. **Proposal Timer** → re-propose a locked block, or request state execution
/// 3. **Transactions Applied** → assemble, sign and broadcast the block
/// 4. **Proposal** → validate, prepare
/// 5. **Prepare quorum** → lock, commit
/// 6. **Commit quorum** → seal, persist, evaluate the epoch boundary, next height
/// 7. **Round Timeout** → ask for the next round; a quorum of such requests
///    moves every validator there
pub struct BftState {
    // ═══════════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════════
    /// Signing key for proposals and votes.
    signing_key: KeyPair,

    /// Address derived from the signing key.
    address: Address,

    config: BftConfig,

    // ═══════════════════════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════════════════════
    /// Owner of the validator set; shared with status readers.
    validators: Arc<ValidatorSetManager>,

    /// Single-attempt reads: the block after the head is the one being built.
    tip: ChainAccessor,

    // ═══════════════════════════════════════════════════════════════════════════
    // Chain State
    // ═══════════════════════════════════════════════════════════════════════════
    /// Last finalized header.
    head: Header,

    /// Decoded extra data of `head`.
    head_extra: Extra,

    /// Validator set for the current height.
    set: Arc<ValidatorSet>,

    // ═══════════════════════════════════════════════════════════════════════════
    // Height State
    // ═══════════════════════════════════════════════════════════════════════════
    round_state: RoundState,

    /// Messages for the next height, replayed once it starts.
    buffered: VecDeque<ConsensusMessage>,

    /// Set once participation stops.
    halted: Option<String>,

    now: Duration,

    stats: BftStats,
}

impl BftState {
    /// Create a state machine positioned after the chain head.
    ///
    /// `validators` must already reflect the chain up to the head (see
    /// [`ValidatorSetManager::restore_from_chain`]). Call [`BftState::start`]
    /// to enter the first height.
    pub fn new(
        signing_key: KeyPair,
        config: BftConfig,
        validators: Arc<ValidatorSetManager>,
        backend: Arc<dyn BlockchainBackend>,
    ) -> Result<Self, BftError> {
        config.validate()?;
        let head_number = backend.latest_number().ok_or(BftError::EmptyChain)?;
        // The backend may report a head whose header is still being written.
        let chain = ChainAccessor::new(backend, config.retry);
        let (head, head_extra) = chain.get_block_data(head_number)?;
        let tip = chain.with_policy(RetryPolicy::single_attempt());
        let set = validators.current_set();
        let address = signing_key.address();

        Ok(Self {
            signing_key,
            address,
            config,
            validators,
            tip,
            round_state: RoundState::new(head.number + 1, ValidatorSetDelta::default()),
            head,
            head_extra,
            set,
            buffered: VecDeque::new(),
            halted: None,
            now: Duration::ZERO,
            stats: BftStats::default(),
        })
    }

    /// Enter the height after the chain head.
    pub fn start(&mut self) -> Vec<Action> {
        if self.halted.is_some() {
            return vec![];
        }
        self.begin_height()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    /// Height currently being decided.
    pub fn height(&self) -> BlockNumber {
        self.round_state.height
    }

    pub fn round(&self) -> Round {
        self.round_state.round
    }

    pub fn step(&self) -> Step {
        self.round_state.step
    }

    /// Last finalized header.
    pub fn head(&self) -> &Header {
        &self.head
    }

    pub fn locked(&self) -> Option<&LockedBlock> {
        self.round_state.locked.as_ref()
    }

    pub fn validator_set(&self) -> &Arc<ValidatorSet> {
        &self.set
    }

    pub fn validators(&self) -> &Arc<ValidatorSetManager> {
        &self.validators
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn stats(&self) -> BftStats {
        self.stats
    }

    /// Proposer for `(height, round)` under the current set.
    pub fn proposer_for(&self, height: BlockNumber, round: Round) -> Option<Address> {
        self.set.proposer_for(height, round).map(|v| v.address)
    }

    fn is_proposer(&self, round: Round) -> bool {
        self.proposer_for(self.round_state.height, round) == Some(self.address)
    }

    fn is_member(&self) -> bool {
        self.set.contains(&self.address)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Heights and rounds
    // ═══════════════════════════════════════════════════════════════════════════

    fn begin_height(&mut self) -> Vec<Action> {
        let height = self.head.number + 1;
        self.set = self.validators.current_set();
        let expected_delta = if is_end_of_period(height, self.config.period_size) {
            self.validators.pending_delta()
        } else {
            ValidatorSetDelta::default()
        };
        self.round_state = RoundState::new(height, expected_delta);

        info!(
            validator = ?self.address,
            height,
            epoch = self.validators.current_epoch(),
            validators = self.set.len(),
            member = self.is_member(),
            "Starting height"
        );

        let mut actions = self.start_round(0);
        actions.extend(self.replay_buffered());
        actions
    }

    fn start_round(&mut self, round: Round) -> Vec<Action> {
        self.round_state.advance_to(round);
        let height = self.round_state.height;

        let mut actions = vec![Action::SetTimer {
            id: TimerId::Round,
            duration: self.config.timeout_for_round(round),
        }];
        if self.is_proposer(round) {
            actions.push(Action::SetTimer {
                id: TimerId::Proposal,
                duration: self.config.block_interval,
            });
        } else {
            actions.push(Action::CancelTimer {
                id: TimerId::Proposal,
            });
        }

        debug!(
            validator = ?self.address,
            height,
            round,
            proposer = ?self.proposer_for(height, round),
            "Round started"
        );

        // The proposal and votes for this round may have arrived early.
        if let Some(proposal) = self.round_state.future_proposals.remove(&round) {
            actions.extend(self.on_proposal(proposal));
        }
        actions.extend(self.check_progress());
        actions
    }

    fn halt(&mut self, reason: String) -> Vec<Action> {
        error!(
            validator = ?self.address,
            height = self.round_state.height,
            reason = %reason,
            "Halting consensus participation"
        );
        self.halted = Some(reason.clone());
        vec![
            Action::CancelTimer {
                id: TimerId::Proposal,
            },
            Action::CancelTimer { id: TimerId::Round },
            Action::Halt { reason },
        ]
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Proposing
    // ═══════════════════════════════════════════════════════════════════════════

    /// Handle the proposal timer: build this round's proposal if we are its proposer.
    pub fn on_proposal_timer(&mut self) -> Vec<Action> {
        let rs = &self.round_state;
        let round = rs.round;
        if rs.proposed
            || rs.proposal.is_some()
            || rs.awaiting_execution.is_some()
            || rs.step != Step::Propose
            || !self.is_proposer(round)
        {
            return vec![];
        }

        // A locked block must be re-proposed as is. Our own lock wins over
        // locks reported in round changes.
        let lock = rs
            .locked
            .clone()
            .or_else(|| rs.round_changes.best_lock(round).cloned());
        if let Some(lock) = lock {
            match validate_block(&lock.block, &self.block_context()) {
                Ok(()) => {
                    info!(
                        validator = ?self.address,
                        height = rs.height,
                        round,
                        locked_round = lock.round,
                        block_hash = ?lock.block.hash(),
                        "Re-proposing locked block"
                    );
                    return self.propose_block(lock.block);
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring reported lock that does not validate");
                }
            }
        }

        let height = self.round_state.height;
        self.round_state.awaiting_execution = Some(round);
        debug!(validator = ?self.address, height, round, "Requesting block contents");
        vec![Action::ApplyTransactions {
            height,
            round,
            parent_state_root: self.head.state_root,
            max_transactions: self.config.max_transactions_per_block,
        }]
    }

    /// Handle the state-execution callback for our own proposal.
    pub fn on_transactions_applied(
        &mut self,
        height: BlockNumber,
        round: Round,
        result: Result<AppliedTransactions, String>,
    ) -> Vec<Action> {
        let rs = &self.round_state;
        if height != rs.height || round != rs.round || rs.awaiting_execution != Some(round) {
            debug!(height, round, "Discarding stale execution result");
            return vec![];
        }
        self.round_state.awaiting_execution = None;

        let applied = match result {
            Ok(applied) => applied,
            Err(reason) => {
                // The round times out normally; execution is never retried.
                warn!(height, round, reason = %reason, "Block execution failed");
                return vec![];
            }
        };

        let (epoch_start_number, epoch_start_hash) = self.validators.epoch_start();
        let checkpoint = Checkpoint {
            epoch_number: self.validators.current_epoch(),
            epoch_start_number,
            epoch_start_hash,
            event_root: receipts_root(&applied.receipts),
        };
        let extra = Extra::new(self.round_state.expected_delta.clone(), checkpoint);
        let timestamp = (self.now.as_millis() as u64).max(self.head.timestamp);
        let header = Header::new(
            height,
            self.head.hash,
            self.address,
            applied.state_root,
            transactions_root(&applied.transactions),
            timestamp,
            &extra,
        );

        self.propose_block(Block {
            header,
            transactions: applied.transactions,
        })
    }

    fn propose_block(&mut self, block: Block) -> Vec<Action> {
        let round = self.round_state.round;
        let proposal = Proposal::new(round, block, &self.signing_key);
        self.round_state.proposed = true;

        info!(
            validator = ?self.address,
            height = proposal.height,
            round,
            block_hash = ?proposal.block.hash(),
            transactions = proposal.block.transactions.len(),
            "Proposing block"
        );

        let mut actions = vec![Action::Broadcast {
            message: proposal.clone().into(),
        }];
        actions.extend(self.accept_proposal(proposal));
        actions
    }

    fn block_context(&self) -> BlockContext<'_> {
        BlockContext {
            head: &self.head,
            validators: &self.set,
            epoch: self.validators.current_epoch(),
            epoch_start: self.validators.epoch_start(),
            expected_delta: &self.round_state.expected_delta,
            period_size: self.config.period_size,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Inbound messages
    // ═══════════════════════════════════════════════════════════════════════════

    /// Handle an unverified message from a peer.
    pub fn on_message_received(&mut self, message: ConsensusMessage) -> Vec<Action> {
        let (current_height, current_round) = (self.round_state.height, self.round_state.round);
        let height = message.height();

        if height == current_height + 1 {
            return self.buffer(message);
        }
        if height != current_height {
            trace!(height, current = current_height, "Dropping message for another height");
            self.stats.messages_dropped += 1;
            return vec![];
        }
        let stale = match &message {
            ConsensusMessage::RoundChange(rc) => rc.round <= current_round,
            _ => message.round() < current_round,
        };
        if stale {
            trace!(round = message.round(), current = current_round, "Dropping stale message");
            self.stats.messages_dropped += 1;
            return vec![];
        }
        if self.beyond_round_window(message.round()) {
            trace!(round = message.round(), current = current_round, "Dropping message too far ahead");
            self.stats.messages_dropped += 1;
            return vec![];
        }

        let sender = message.sender();
        if sender == self.address {
            return vec![];
        }
        let Some(validator) = self.set.get(&sender) else {
            warn!(
                sender = ?sender,
                kind = message.type_name(),
                height,
                "Dropping message from non-member"
            );
            self.stats.messages_dropped += 1;
            return vec![];
        };

        vec![Action::VerifyMessage {
            public_key: validator.public_key,
            signing_message: message.signing_message(),
            message,
        }]
    }

    /// Handle the signature verification callback.
    pub fn on_message_verified(&mut self, message: ConsensusMessage, valid: bool) -> Vec<Action> {
        if !valid {
            warn!(
                sender = ?message.sender(),
                kind = message.type_name(),
                height = message.height(),
                "Dropping message with invalid signature"
            );
            self.stats.messages_dropped += 1;
            return vec![];
        }

        let height = message.height();
        if height == self.round_state.height + 1 {
            // We moved on while it was being verified.
            return self.buffer(message);
        }
        if height != self.round_state.height || self.beyond_round_window(message.round()) {
            self.stats.messages_dropped += 1;
            return vec![];
        }

        match message {
            ConsensusMessage::Proposal(proposal) => self.on_proposal(*proposal),
            ConsensusMessage::Vote(vote) => self.on_vote(vote),
            ConsensusMessage::RoundChange(rc) => self.on_round_change(*rc),
        }
    }

    /// Whether `round` is too far above the local round to be worth holding.
    fn beyond_round_window(&self, round: Round) -> bool {
        let rs = &self.round_state;
        let anchor = rs.requested_round.map_or(rs.round, |r| r.max(rs.round));
        round > anchor.saturating_add(MAX_ROUND_LOOKAHEAD)
    }

    fn buffer(&mut self, message: ConsensusMessage) -> Vec<Action> {
        if self.buffered.len() >= self.config.max_buffered_messages {
            debug!(
                kind = message.type_name(),
                height = message.height(),
                "Future-height buffer full, dropping message"
            );
            self.stats.messages_dropped += 1;
        } else {
            self.buffered.push_back(message);
        }
        vec![]
    }

    fn replay_buffered(&mut self) -> Vec<Action> {
        let buffered = std::mem::take(&mut self.buffered);
        let mut actions = Vec::new();
        for message in buffered {
            actions.extend(self.on_message_received(message));
        }
        actions
    }

    /// Handle a verified proposal for the current height.
    #[instrument(level = "debug", skip_all, fields(height = proposal.height, round = proposal.round))]
    fn on_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
        let rs = &mut self.round_state;
        if proposal.round < rs.round {
            debug!("Discarding proposal for an abandoned round");
            return vec![];
        }
        if proposal.round > rs.round {
            if rs.future_proposals.len() < self.config.max_buffered_messages {
                rs.future_proposals.entry(proposal.round).or_insert(proposal);
            }
            return vec![];
        }
        if rs.proposal.is_some() {
            debug!(proposer = ?proposal.proposer, "Ignoring second proposal for this round");
            return vec![];
        }

        let expected = self.proposer_for(proposal.height, proposal.round);
        if expected != Some(proposal.proposer) {
            warn!(
                proposer = ?proposal.proposer,
                expected = ?expected,
                "Rejecting proposal from wrong proposer"
            );
            self.stats.proposals_rejected += 1;
            return vec![];
        }
        if let Err(e) = validate_block(&proposal.block, &self.block_context()) {
            self.reject_proposal(&proposal, e);
            return vec![];
        }
        self.accept_proposal(proposal)
    }

    fn reject_proposal(&mut self, proposal: &Proposal, error: ProposalError) {
        warn!(
            validator = ?self.address,
            proposer = ?proposal.proposer,
            block_hash = ?proposal.block.hash(),
            error = %error,
            "Rejecting invalid proposal"
        );
        self.stats.proposals_rejected += 1;
    }

    /// Store the round's proposal and prepare it unless locked on another block.
    ///
    /// A locked node still tracks the proposal so that a prepare quorum for
    /// it can move the lock, and a commit quorum for it can finalize.
    fn accept_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
        let hash = proposal.block.hash();
        let locked_elsewhere = self
            .round_state
            .locked
            .as_ref()
            .map(|lock| lock.block.hash())
            .filter(|locked| *locked != hash);

        let (height, round) = (proposal.height, proposal.round);
        self.round_state.proposal = Some(proposal);
        self.round_state.step = Step::Prepare;

        let mut actions = Vec::new();
        if let Some(locked) = locked_elsewhere {
            warn!(
                locked = ?locked,
                proposed = ?hash,
                "Locked on a different block, not preparing"
            );
        } else if self.is_member() && !self.round_state.prepared {
            self.round_state.prepared = true;
            let vote = Vote::new(VoteKind::Prepare, height, round, hash, &self.signing_key);
            self.round_state.votes.add(vote);
            actions.push(Action::Broadcast {
                message: vote.into(),
            });
        }
        actions.extend(self.check_progress());
        actions
    }

    fn on_vote(&mut self, vote: Vote) -> Vec<Action> {
        if vote.round < self.round_state.round {
            self.stats.messages_dropped += 1;
            return vec![];
        }
        match self.round_state.votes.add(vote) {
            VoteOutcome::Added => {}
            VoteOutcome::Duplicate => return vec![],
            VoteOutcome::Equivocation { existing } => {
                warn!(
                    voter = ?vote.voter,
                    kind = ?vote.kind,
                    round = vote.round,
                    existing = ?existing,
                    conflicting = ?vote.block_hash,
                    "Equivocating vote ignored"
                );
                self.stats.equivocations += 1;
                return vec![];
            }
        }
        if vote.round == self.round_state.round {
            self.check_progress()
        } else {
            vec![]
        }
    }

    /// Advance PREPARE → COMMIT → FINALIZED as quorums appear for the current round.
    fn check_progress(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        let round = self.round_state.round;
        let Some(hash) = self.round_state.proposal.as_ref().map(|p| p.block.hash()) else {
            return actions;
        };

        // A lock only moves to another block certified in a later round.
        let may_lock = self
            .round_state
            .locked
            .as_ref()
            .map_or(true, |lock| lock.block.hash() == hash || round > lock.round);

        if !self.round_state.prepare_certified
            && may_lock
            && self.round_state.votes.quorum_for(round, VoteKind::Prepare, &self.set) == Some(hash)
        {
            self.round_state.prepare_certified = true;
            let previous = self.round_state.locked.as_ref().map(|lock| lock.block.hash());
            if let Some(proposal) = &self.round_state.proposal {
                self.round_state.locked = Some(LockedBlock {
                    round,
                    block: proposal.block.clone(),
                });
            }
            self.round_state.step = Step::Commit;
            if previous.is_some_and(|previous| previous != hash) {
                info!(
                    validator = ?self.address,
                    height = self.round_state.height,
                    round,
                    from = ?previous,
                    to = ?hash,
                    "Prepare quorum for another block, lock moved"
                );
            } else {
                info!(
                    validator = ?self.address,
                    height = self.round_state.height,
                    round,
                    block_hash = ?hash,
                    "Prepare quorum reached, locked"
                );
            }

            if self.is_member() {
                let vote = Vote::new(
                    VoteKind::Commit,
                    self.round_state.height,
                    round,
                    hash,
                    &self.signing_key,
                );
                self.round_state.votes.add(vote);
                actions.push(Action::Broadcast {
                    message: vote.into(),
                });
            }
        }

        if self.round_state.votes.quorum_for(round, VoteKind::Commit, &self.set) == Some(hash) {
            actions.extend(self.finalize(round));
        }
        actions
    }

    fn finalize(&mut self, round: Round) -> Vec<Action> {
        let Some(proposal) = self.round_state.proposal.take() else {
            return vec![];
        };
        let hash = proposal.block.hash();
        let mut extra = match proposal.block.header.extra() {
            Ok(extra) => extra,
            Err(e) => return self.halt(format!("accepted block has malformed extra: {e}")),
        };
        extra.round = round;
        extra.committed_seals = self.round_state.votes.commit_seals(round, &hash, &self.set);

        let header = proposal.block.header.with_sealed_extra(&extra);
        let block = Block {
            header: header.clone(),
            transactions: proposal.block.transactions,
        };
        self.round_state.step = Step::Finalized;
        self.stats.blocks_finalized += 1;

        info!(
            validator = ?self.address,
            height = header.number,
            round,
            block_hash = ?hash,
            seals = extra.committed_seals.len(),
            transactions = block.transactions.len(),
            "Block finalized"
        );

        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::Proposal,
            },
            Action::CancelTimer { id: TimerId::Round },
            Action::PersistBlock {
                block: block.clone(),
            },
            Action::EmitFinalizedBlock { block },
        ];
        self.head = header;
        self.head_extra = extra;
        actions.extend(self.advance_height());
        actions
    }

    /// Apply the epoch boundary closed by the new head, if any, then move on.
    fn advance_height(&mut self) -> Vec<Action> {
        let number = self.head.number;
        match resolve_epoch_end(
            number,
            &self.head_extra,
            &self.tip,
            self.config.epoch_size,
        ) {
            Ok(true) => {
                if let Err(e) =
                    self.validators
                        .apply_boundary(number, self.head.hash, &self.head_extra)
                {
                    return self.halt(format!("epoch boundary at block {number}: {e}"));
                }
            }
            Ok(false) => {}
            Err(e) => return self.halt(format!("boundary evaluation for block {number}: {e}")),
        }
        self.begin_height()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Round change
    // ═══════════════════════════════════════════════════════════════════════════

    /// Handle round-timer expiry.
    pub fn on_round_timeout(&mut self) -> Vec<Action> {
        let rs = &self.round_state;
        if rs.step == Step::Finalized {
            return vec![];
        }
        let target = rs.requested_round.unwrap_or(rs.round).max(rs.round) + 1;
        self.stats.round_timeouts += 1;
        info!(
            validator = ?self.address,
            height = rs.height,
            round = rs.round,
            step = %rs.step,
            target,
            "Round timed out"
        );

        let mut actions = vec![Action::SetTimer {
            id: TimerId::Round,
            duration: self.config.timeout_for_round(target),
        }];
        actions.extend(self.request_round(target));
        actions
    }

    fn request_round(&mut self, target: Round) -> Vec<Action> {
        self.round_state.requested_round = Some(target);
        self.round_state.step = Step::RoundChange;

        let mut actions = Vec::new();
        if self.is_member() {
            let rc = RoundChange::new(
                self.round_state.height,
                target,
                self.round_state.locked.clone(),
                &self.signing_key,
            );
            self.round_state.round_changes.add(rc.clone());
            actions.push(Action::Broadcast { message: rc.into() });
        }
        actions.extend(self.check_round_changes());
        actions
    }

    fn on_round_change(&mut self, rc: RoundChange) -> Vec<Action> {
        if rc.round <= self.round_state.round {
            return vec![];
        }
        if let Some(lock) = &rc.locked {
            if lock.block.number() != rc.height {
                warn!(voter = ?rc.voter, "Round change carries a lock for another height");
                self.stats.messages_dropped += 1;
                return vec![];
            }
        }
        if !self.round_state.round_changes.add(rc) {
            return vec![];
        }
        self.check_round_changes()
    }

    fn check_round_changes(&mut self) -> Vec<Action> {
        let current = self.round_state.round;
        if let Some(round) = self
            .round_state
            .round_changes
            .quorum_round_above(current, &self.set)
        {
            self.stats.round_changes += 1;
            info!(
                validator = ?self.address,
                height = self.round_state.height,
                from = current,
                to = round,
                "Round change quorum, moving to new round"
            );
            return self.start_round(round);
        }

        if let Some(round) = self
            .round_state
            .round_changes
            .catch_up_round(current, &self.set)
        {
            let already = self.round_state.requested_round.is_some_and(|r| r >= round);
            if !already {
                debug!(
                    validator = ?self.address,
                    height = self.round_state.height,
                    round,
                    "Joining round change requested by peers"
                );
                return self.request_round(round);
            }
        }
        vec![]
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Operator requests
    // ═══════════════════════════════════════════════════════════════════════════

    fn on_validator_set_change(&mut self, delta: ValidatorSetDelta) -> Vec<Action> {
        match self.validators.queue_delta(delta) {
            Ok(()) => info!(
                validator = ?self.address,
                pending = ?self.validators.pending_delta(),
                "Membership change queued for next period boundary"
            ),
            Err(e) => warn!(error = %e, "Rejected membership change"),
        }
        vec![]
    }
}

impl StateMachine for BftState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.halted.is_some() {
            return vec![];
        }
        match event {
            Event::ProposalTimer => self.on_proposal_timer(),
            Event::RoundTimeout => self.on_round_timeout(),
            Event::MessageReceived { message } => self.on_message_received(message),
            Event::MessageVerified { message, valid } => self.on_message_verified(message, valid),
            Event::TransactionsApplied {
                height,
                round,
                result,
            } => self.on_transactions_applied(height, round, result),
            Event::ValidatorSetChangeRequested { delta } => self.on_validator_set_change(delta),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}

impl std::fmt::Debug for BftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BftState")
            .field("address", &self.address)
            .field("height", &self.round_state.height)
            .field("round", &self.round_state.round)
            .field("step", &self.round_state.step)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}
