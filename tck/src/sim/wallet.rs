//! Keys, addresses and signatures of simulated wallets.
//!
//! Addresses are `sim1` followed by the hex encoded 20-byte public key
//! hash and always pay to a P2PKH script. Signatures are a keyed digest of
//! the signature hash: structurally checkable, not cryptographically sound.

use std::collections::HashMap;

use regnet_common::{
    crypto::{hash256, Hash},
    serializer::Serializer,
    transaction::{p2pkh_script, ScriptPattern, Transaction},
};
use sha2::{Digest, Sha256};

use crate::node::NodeId;

const ADDRESS_PREFIX: &str = "sim1";
const SCRIPT_ADDRESS_PREFIX: &str = "sim3";
const KEY_PREFIX: &str = "simkey";

pub(crate) const SIGNATURE_SIZE: usize = 71;
pub(crate) const PUBKEY_SIZE: usize = 33;
// Size of a signed input on the wire
pub(crate) const SIGNED_INPUT_SIZE: usize = 32 + 4 + 1 + 1 + SIGNATURE_SIZE + 1 + PUBKEY_SIZE + 4;

type PubkeyHash = [u8; 20];

fn pubkey(secret: &[u8; 32]) -> [u8; PUBKEY_SIZE] {
    let mut key = [0u8; PUBKEY_SIZE];
    key[0] = 0x02;
    key[1..].copy_from_slice(&Sha256::digest(secret));
    key
}

fn pubkey_hash(pubkey: &[u8]) -> PubkeyHash {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hash256(pubkey).as_bytes()[..20]);
    hash
}

pub(crate) fn address_for(hash: &PubkeyHash) -> String {
    format!("{}{}", ADDRESS_PREFIX, hex::encode(hash))
}

pub(crate) fn decode_address(address: &str) -> Option<PubkeyHash> {
    let bytes = hex::decode(address.strip_prefix(ADDRESS_PREFIX)?).ok()?;
    bytes.try_into().ok()
}

pub(crate) fn script_for_address(address: &str) -> Option<Vec<u8>> {
    decode_address(address).map(|hash| p2pkh_script(&hash))
}

pub(crate) fn address_for_script(script: &[u8]) -> Option<String> {
    match ScriptPattern::classify(script)? {
        ScriptPattern::PayToPubkeyHash(hash) => Some(address_for(&hash)),
        ScriptPattern::PayToScriptHash(hash) => {
            Some(format!("{}{}", SCRIPT_ADDRESS_PREFIX, hex::encode(hash)))
        }
    }
}

/// Digest every input commits to: the transaction with all input scripts
/// cleared, followed by the input index.
pub(crate) fn signature_hash(tx: &Transaction, index: usize) -> Hash {
    let mut stripped = tx.clone();
    for input in &mut stripped.inputs {
        input.script_sig.clear();
    }
    let mut bytes = stripped.to_bytes();
    bytes.extend_from_slice(&(index as u32).to_le_bytes());
    hash256(&bytes)
}

fn signature(pubkey: &[u8], sighash: &Hash) -> [u8; SIGNATURE_SIZE] {
    let mut preimage = pubkey.to_vec();
    preimage.extend_from_slice(sighash.as_bytes());
    let mut sig = [0x01u8; SIGNATURE_SIZE];
    sig[..32].copy_from_slice(hash256(&preimage).as_bytes());
    sig
}

/// `<push sig> <push pubkey>`
fn script_sig(pubkey: &[u8; PUBKEY_SIZE], sighash: &Hash) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + SIGNATURE_SIZE + PUBKEY_SIZE);
    script.push(SIGNATURE_SIZE as u8);
    script.extend_from_slice(&signature(pubkey, sighash));
    script.push(PUBKEY_SIZE as u8);
    script.extend_from_slice(pubkey);
    script
}

/// Whether `script_sig` unlocks the P2PKH output `prev_script`.
pub(crate) fn verify_input(script_sig: &[u8], prev_script: &[u8], sighash: &Hash) -> bool {
    let expected = match ScriptPattern::classify(prev_script) {
        Some(ScriptPattern::PayToPubkeyHash(hash)) => hash,
        _ => return false,
    };
    if script_sig.len() != 2 + SIGNATURE_SIZE + PUBKEY_SIZE
        || script_sig[0] as usize != SIGNATURE_SIZE
        || script_sig[1 + SIGNATURE_SIZE] as usize != PUBKEY_SIZE
    {
        return false;
    }
    let sig = &script_sig[1..1 + SIGNATURE_SIZE];
    let key = &script_sig[2 + SIGNATURE_SIZE..];
    pubkey_hash(key) == expected && sig == signature(key, sighash)
}

pub(crate) struct Wallet {
    seed: [u8; 32],
    counter: u64,
    keys: HashMap<PubkeyHash, [u8; 32]>,
}

impl Wallet {
    pub fn new(id: &NodeId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(id.host.as_bytes());
        hasher.update(id.port.to_le_bytes());
        hasher.update(id.rpc_port.to_le_bytes());
        Self {
            seed: hasher.finalize().into(),
            counter: 0,
            keys: HashMap::new(),
        }
    }

    pub fn new_address(&mut self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_le_bytes());
        self.counter += 1;
        let secret: [u8; 32] = hasher.finalize().into();
        let hash = pubkey_hash(&pubkey(&secret));
        self.keys.insert(hash, secret);
        address_for(&hash)
    }

    pub fn owns_address(&self, address: &str) -> bool {
        decode_address(address).map_or(false, |hash| self.keys.contains_key(&hash))
    }

    pub fn owns_script(&self, script: &[u8]) -> bool {
        matches!(
            ScriptPattern::classify(script),
            Some(ScriptPattern::PayToPubkeyHash(hash)) if self.keys.contains_key(&hash)
        )
    }

    pub fn dump_key(&self, address: &str) -> Option<String> {
        let secret = self.keys.get(&decode_address(address)?)?;
        Some(format!("{}{}", KEY_PREFIX, hex::encode(secret)))
    }

    /// Import an exported key, returning the address it controls.
    pub fn import_key(&mut self, key: &str) -> Option<String> {
        let secret: [u8; 32] = hex::decode(key.strip_prefix(KEY_PREFIX)?).ok()?.try_into().ok()?;
        let hash = pubkey_hash(&pubkey(&secret));
        self.keys.insert(hash, secret);
        Some(address_for(&hash))
    }

    /// Sign input `index` if `prev_script` pays to one of our keys.
    pub fn sign_input(&self, tx: &mut Transaction, index: usize, prev_script: &[u8]) -> bool {
        let secret = match ScriptPattern::classify(prev_script) {
            Some(ScriptPattern::PayToPubkeyHash(hash)) => match self.keys.get(&hash) {
                Some(secret) => secret,
                None => return false,
            },
            _ => return false,
        };
        let sighash = signature_hash(tx, index);
        tx.inputs[index].script_sig = script_sig(&pubkey(secret), &sighash);
        true
    }
}
