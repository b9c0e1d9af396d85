use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use tracing::{debug, warn};

use abci_round_core::crypto::LedgerApis;
use abci_round_core::{AbciAppError, BlockHeight, ConsensusParams, SynchronizedData, Transaction};

use crate::abci_app::AbciApp;
use crate::adaptor::Adaptor;
use crate::blockchain::{BlockBuilder, Blockchain, Header};
use crate::round::Round;

/// Phases of the construction of a block.
///
/// ```text
///   WaitingForBeginBlock --begin_block--> WaitingForDeliverTx
///            ^                                  |
///            |                               end_block
///          commit                               |
///            |                                  v
///            +------------------------- WaitingForCommit
/// ```
///
/// `deliver_tx` is accepted any number of times while waiting for deliver_tx.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlockConstructionPhase {
    /// Ready for the next block
    WaitingForBeginBlock,
    /// Building the block from the delivered transactions
    WaitingForDeliverTx,
    /// The block is complete, waiting for it to be committed
    WaitingForCommit,
}

impl Display for BlockConstructionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            BlockConstructionPhase::WaitingForBeginBlock => "waiting_for_begin_block",
            BlockConstructionPhase::WaitingForDeliverTx => "waiting_for_deliver_tx",
            BlockConstructionPhase::WaitingForCommit => "waiting_for_commit",
        };
        write!(f, "{}", phase)
    }
}

/// A sequence of rounds, fed by the blocks delivered by the consensus engine.
///
/// The period enforces the order of the ABCI block calls (`begin_block`,
/// `deliver_tx`*, `end_block`, `commit`), keeps the chain of committed blocks
/// and forwards transactions and time to its [`AbciApp`]. Transactions are
/// admitted only if their signature recovers to the payload sender.
pub struct Period<A: Adaptor> {
    ledger_id: String,
    ledger_apis: LedgerApis,
    blockchain: Blockchain,
    block_builder: BlockBuilder,
    phase: BlockConstructionPhase,
    abci_app: AbciApp<A>,
}

impl<A: Adaptor> Period<A> {
    /// Build the app of the period and enter its initial round.
    ///
    /// # Params
    /// - adaptor: the application definition
    /// - initial_data: the state the initial round starts from
    /// - consensus_params: the committee parameters
    /// - ledger_id: the ledger whose signature scheme signs transactions
    /// - ledger_apis: the available signature schemes
    pub fn setup(
        adaptor: A,
        initial_data: SynchronizedData,
        consensus_params: ConsensusParams,
        ledger_id: impl Into<String>,
        ledger_apis: LedgerApis,
    ) -> Result<Self, AbciAppError> {
        let mut abci_app = AbciApp::new(adaptor, initial_data, consensus_params)?;
        abci_app.setup()?;

        Ok(Period {
            ledger_id: ledger_id.into(),
            ledger_apis,
            blockchain: Blockchain::new(),
            block_builder: BlockBuilder::new(),
            phase: BlockConstructionPhase::WaitingForBeginBlock,
            abci_app,
        })
    }

    pub fn abci_app(&self) -> &AbciApp<A> {
        &self.abci_app
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn phase(&self) -> BlockConstructionPhase {
        self.phase
    }

    pub fn height(&self) -> BlockHeight {
        self.blockchain.height()
    }

    pub fn is_finished(&self) -> bool {
        self.abci_app.is_finished()
    }

    pub fn current_round(&self) -> Result<&dyn Round<A::Event>, AbciAppError> {
        self.abci_app.current_round()
    }

    pub fn current_round_id(&self) -> Option<&'static str> {
        self.abci_app.current_round_id()
    }

    pub fn current_round_height(&self) -> usize {
        self.abci_app.current_round_height()
    }

    pub fn last_round_id(&self) -> Option<&'static str> {
        self.abci_app.last_round_id()
    }

    /// Timestamp of the last committed block.
    pub fn last_timestamp(&self) -> Option<SystemTime> {
        self.blockchain.last_block().map(|block| block.timestamp())
    }

    pub fn latest_result(&self) -> Option<&SynchronizedData> {
        self.abci_app.latest_result()
    }

    fn expect_phase(&self, phase: BlockConstructionPhase, request: &str) -> Result<(), AbciAppError> {
        if self.phase != phase {
            debug!("'{}' request received while {}", request, self.phase);
            return Err(AbciAppError::Internal(format!("cannot accept a '{}' request.", request)));
        }
        Ok(())
    }

    pub fn begin_block(&mut self, header: Header) -> Result<(), AbciAppError> {
        if self.is_finished() {
            return Err(AbciAppError::internal("period is finished, cannot accept new blocks"));
        }
        self.expect_phase(BlockConstructionPhase::WaitingForBeginBlock, "begin_block")?;

        self.phase = BlockConstructionPhase::WaitingForDeliverTx;
        self.block_builder.reset();
        self.block_builder.set_header(header)?;
        self.abci_app.update_time(header.timestamp)
    }

    /// Check, without side effects, whether a transaction would be accepted
    /// by the current round.
    pub fn check_tx(&self, transaction: &Transaction) -> Result<(), AbciAppError> {
        if self.is_finished() {
            return Err(AbciAppError::internal("period is finished, cannot accept new transactions"));
        }
        transaction.verify(&self.ledger_id, &self.ledger_apis)?;
        self.abci_app.check_transaction(transaction)
    }

    /// Apply a transaction to the current round and add it to the block.
    /// A rejected transaction is not added.
    pub fn deliver_tx(&mut self, transaction: Transaction) -> Result<(), AbciAppError> {
        self.expect_phase(BlockConstructionPhase::WaitingForDeliverTx, "deliver_tx")?;

        let admission = transaction
            .verify(&self.ledger_id, &self.ledger_apis)
            .and_then(|_| self.abci_app.check_transaction(&transaction));
        if let Err(e) = admission {
            warn!("transaction {} rejected: {}", transaction.payload().id(), e);
            return Err(e);
        }
        self.abci_app.process_transaction(&transaction)?;
        self.block_builder.add_transaction(transaction);
        Ok(())
    }

    pub fn end_block(&mut self) -> Result<(), AbciAppError> {
        self.expect_phase(BlockConstructionPhase::WaitingForDeliverTx, "end_block")?;
        self.phase = BlockConstructionPhase::WaitingForCommit;
        Ok(())
    }

    /// Commit the block, then let the current round decide whether it is done.
    ///
    /// If the block cannot be added to the chain the period stays waiting for
    /// the commit.
    pub fn commit(&mut self) -> Result<(), AbciAppError> {
        self.expect_phase(BlockConstructionPhase::WaitingForCommit, "commit")?;

        let block = self.block_builder.get_block()?;
        self.blockchain.add_block(block)?;
        self.phase = BlockConstructionPhase::WaitingForBeginBlock;
        self.update_round()
    }

    fn update_round(&mut self) -> Result<(), AbciAppError> {
        let round = self.abci_app.current_round()?;
        let Some((result, event)) = round.end_block()? else {
            return Ok(());
        };
        debug!(
            "updating round, current_round {}, event: {}, round result {:?}",
            round.round_id(),
            event,
            result
        );
        self.abci_app.process_event(event, Some(result))
    }
}
