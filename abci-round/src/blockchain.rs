use std::time::SystemTime;

use abci_round_core::{AbciAppError, BlockHeight, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub height: BlockHeight,
    pub timestamp: SystemTime,
}

impl Header {
    pub fn new(height: BlockHeight, timestamp: SystemTime) -> Self {
        Header { height, timestamp }
    }
}

/// A committed block. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Block { header, transactions }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn timestamp(&self) -> SystemTime {
        self.header.timestamp
    }
}

/// Accumulates the header and transactions of the block being built.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    header: Option<Header>,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.transactions.clear();
    }

    pub fn header(&self) -> Result<&Header, AbciAppError> {
        self.header.as_ref().ok_or_else(|| AbciAppError::internal("header not set"))
    }

    /// Set the header of the block. It can only be set once per block.
    pub fn set_header(&mut self, header: Header) -> Result<(), AbciAppError> {
        if self.header.is_some() {
            return Err(AbciAppError::internal("header already set"));
        }
        self.header = Some(header);
        Ok(())
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn get_block(&self) -> Result<Block, AbciAppError> {
        Ok(Block::new(*self.header()?, self.transactions.clone()))
    }
}

/// The chain of the blocks committed during a period.
///
/// Heights start at 1; an empty chain has height 0. The contents of the blocks
/// are not validated here: ordering and agreement are up to the consensus
/// engine delivering them.
#[derive(Debug, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block.
    ///
    /// # Params
    /// - block: the block to append
    ///
    /// # Returns
    /// [`AbciAppError::AddBlock`] unless the block height is exactly one more
    /// than the chain height.
    pub fn add_block(&mut self, block: Block) -> Result<(), AbciAppError> {
        let expected = self.height() + 1;
        let actual = block.header.height;
        if expected != actual {
            return Err(AbciAppError::AddBlock { expected, actual });
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn height(&self) -> BlockHeight {
        self.blocks.len() as BlockHeight
    }

    pub fn length(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }
}
