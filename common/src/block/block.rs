use super::{calculate_merkle_root, BlockHeader};
use crate::{
    crypto::Hash,
    serializer::{compact_size_len, Reader, ReaderError, Serializer, Writer},
    transaction::Transaction,
};

/// A transaction inside a block together with the exact bytes it was
/// decoded from. Encoding the block re-emits those bytes verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransaction {
    transaction: Transaction,
    raw: Vec<u8>,
}

impl BlockTransaction {
    pub fn new(transaction: Transaction) -> Self {
        let raw = transaction.to_bytes();
        Self { transaction, raw }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    // hash256 of the captured bytes
    pub fn hash(&self) -> Hash {
        crate::crypto::hash256(&self.raw)
    }
}

impl From<Transaction> for BlockTransaction {
    fn from(transaction: Transaction) -> Self {
        Self::new(transaction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<BlockTransaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<BlockTransaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut BlockHeader {
        &mut self.header
    }

    pub fn transactions(&self) -> &[BlockTransaction] {
        &self.transactions
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn block_hash(&self) -> String {
        self.header.block_hash()
    }

    pub fn compute_merkle_root(&self) -> Hash {
        let hashes: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        calculate_merkle_root(&hashes)
    }

    pub fn has_valid_merkle_root(&self) -> bool {
        self.compute_merkle_root() == self.header.merkle_root
    }
}

impl Serializer for Block {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_compact_size(self.transactions.len() as u64);
        for tx in &self.transactions {
            writer.write_bytes(&tx.raw);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let header = BlockHeader::read(reader)?;
        let count = reader.read_compact_size()?;
        // Smallest transaction: version, two counts and lock time
        if count > (reader.remaining() / 10) as u64 {
            return Err(ReaderError::InvalidSize);
        }

        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (transaction, raw) = Transaction::read_captured(reader)?;
            transactions.push(BlockTransaction { transaction, raw });
        }

        Ok(Self {
            header,
            transactions,
        })
    }

    fn size(&self) -> usize {
        self.header.size()
            + compact_size_len(self.transactions.len() as u64)
            + self.transactions.iter().map(|tx| tx.raw.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        amount::Amount,
        transaction::{p2pkh_script, OutPoint, TxInput, TxOutput},
    };

    fn coinbase(height: u8) -> Transaction {
        let mut input = TxInput::new(OutPoint::new(Hash::zero(), u32::MAX));
        input.script_sig = vec![0x01, height];
        Transaction::new(
            vec![input],
            vec![TxOutput::new(
                Amount::from_sat(5_000_000_000),
                p2pkh_script(&[height; 20]),
            )],
        )
    }

    fn block() -> Block {
        let txs: Vec<BlockTransaction> = vec![coinbase(1).into(), coinbase(2).into()];
        let hashes: Vec<Hash> = txs.iter().map(|t| t.hash()).collect();
        let header = BlockHeader::new(
            4,
            Hash::new([7u8; 32]),
            calculate_merkle_root(&hashes),
            1_700_000_000,
            0x207f_ffff,
            0,
        );
        Block::new(header, txs)
    }

    #[test]
    fn test_block_roundtrip() {
        let block = block();
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), block.size());

        let decoded = Block::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.to_bytes(), bytes);
        assert!(decoded.has_valid_merkle_root());
        assert!(decoded.transactions()[0].transaction().is_coinbase());
    }

    #[test]
    fn test_captured_bytes_reemitted() {
        let block = block();
        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        for (a, b) in decoded.transactions().iter().zip(block.transactions()) {
            assert_eq!(a.raw(), b.raw());
            assert_eq!(a.transaction().to_bytes(), a.raw());
        }
    }

    #[test]
    fn test_block_count_beyond_buffer() {
        let mut bytes = block().header().to_bytes();
        bytes.push(0xfd);
        bytes.extend_from_slice(&0xffffu16.to_le_bytes());
        assert_eq!(Block::from_bytes(&bytes), Err(ReaderError::InvalidSize));
    }
}
