mod script;


pub use script::{p2pkh_script, p2sh_script, validate_p2pkh, ScriptError, ScriptPattern};

use crate::{
    amount::Amount,
    crypto::{hash256, Hash, HASH_SIZE},
    serializer::{compact_size_len, Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

/// Reference to one output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    // Wire order, i.e. the byte-reversed txid
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    // Build from a txid as displayed by the node
    pub fn from_txid(txid: &str, index: u32) -> Result<Self, ReaderError> {
        let hash = Hash::from_display_hex(txid).map_err(|_| ReaderError::InvalidHex)?;
        Ok(Self { hash, index })
    }

    pub fn txid(&self) -> String {
        self.hash.to_display_hex()
    }

    pub fn is_null(&self) -> bool {
        self.hash == Hash::zero() && self.index == u32::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(amount: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            amount,
            script_pubkey,
        }
    }
}

/// Legacy (non-witness) transaction layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 2,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Decode a transaction and keep the exact bytes it was read from.
    pub fn read_captured(reader: &mut Reader) -> Result<(Self, Vec<u8>), ReaderError> {
        reader.push_storage_context();
        let tx = Self::read(reader)?;
        let raw = reader.pop_storage_context()?;
        Ok((tx, raw))
    }

    pub fn hash(&self) -> Hash {
        hash256(&self.to_bytes())
    }

    // Transaction id as displayed by the node
    pub fn txid(&self) -> String {
        self.hash().to_display_hex()
    }

    pub fn total_output(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    // Index of the first output paying to `script`
    pub fn find_output(&self, script: &[u8]) -> Option<usize> {
        self.outputs.iter().position(|o| o.script_pubkey == script)
    }
}

impl Serializer for OutPoint {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.hash);
        writer.write_u32(self.index);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let hash = reader.read_hash()?;
        let index = reader.read_u32()?;
        Ok(Self { hash, index })
    }

    fn size(&self) -> usize {
        HASH_SIZE + 4
    }
}

impl Serializer for TxInput {
    fn write(&self, writer: &mut Writer) {
        self.prevout.write(writer);
        writer.write_var_bytes(&self.script_sig);
        writer.write_u32(self.sequence);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let prevout = OutPoint::read(reader)?;
        let script_sig = reader.read_var_bytes()?;
        let sequence = reader.read_u32()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }

    fn size(&self) -> usize {
        self.prevout.size()
            + compact_size_len(self.script_sig.len() as u64)
            + self.script_sig.len()
            + 4
    }
}

impl Serializer for TxOutput {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.amount.to_sat());
        writer.write_var_bytes(&self.script_pubkey);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let amount = Amount::from_sat(reader.read_u64()?);
        let script_pubkey = reader.read_var_bytes()?;
        Ok(Self {
            amount,
            script_pubkey,
        })
    }

    fn size(&self) -> usize {
        8 + compact_size_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.version);
        writer.write_compact_size(self.inputs.len() as u64);
        for input in &self.inputs {
            input.write(writer);
        }
        writer.write_compact_size(self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(writer);
        }
        writer.write_u32(self.lock_time);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_u32()?;

        let input_count = reader.read_compact_size()?;
        // Every input needs at least 41 bytes, bound the allocation by what is left
        if input_count > (reader.remaining() / 41) as u64 {
            return Err(ReaderError::InvalidSize);
        }
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(TxInput::read(reader)?);
        }

        let output_count = reader.read_compact_size()?;
        if output_count > (reader.remaining() / 9) as u64 {
            return Err(ReaderError::InvalidSize);
        }
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(TxOutput::read(reader)?);
        }

        let lock_time = reader.read_u32()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    fn size(&self) -> usize {
        4 + compact_size_len(self.inputs.len() as u64)
            + self.inputs.iter().map(|i| i.size()).sum::<usize>()
            + compact_size_len(self.outputs.len() as u64)
            + self.outputs.iter().map(|o| o.size()).sum::<usize>()
            + 4
    }
}
