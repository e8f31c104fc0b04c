//! Recognition of the two canonical payout script shapes.
//!
//! ```text
//! P2PKH: OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG   (76 a9 14 .. 88 ac)
//! P2SH:  OP_HASH160 <20 bytes> OP_EQUAL                            (a9 14 .. 87)
//! ```
//!
//! Scripts are never executed.

use thiserror::Error;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const PUSH_20: u8 = 0x14;

const P2PKH_LEN: usize = 25;
const P2SH_LEN: usize = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPattern {
    PayToPubkeyHash([u8; 20]),
    PayToScriptHash([u8; 20]),
}

impl ScriptPattern {
    pub fn classify(script: &[u8]) -> Option<Self> {
        if validate_p2pkh(script).is_ok() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[3..23]);
            return Some(ScriptPattern::PayToPubkeyHash(hash));
        }
        if script.len() == P2SH_LEN
            && script[0] == OP_HASH160
            && script[1] == PUSH_20
            && script[22] == OP_EQUAL
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[2..22]);
            return Some(ScriptPattern::PayToScriptHash(hash));
        }
        None
    }

    pub fn to_script(&self) -> Vec<u8> {
        match self {
            ScriptPattern::PayToPubkeyHash(hash) => p2pkh_script(hash),
            ScriptPattern::PayToScriptHash(hash) => p2sh_script(hash),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("scriptpubkey too short")]
    TooShort,
    #[error("scriptpubkey too long")]
    TooLong,
    #[error("OP_DUP not found")]
    MissingDup,
    #[error("OP_HASH160 not found")]
    MissingHash160,
    #[error("OP_EQUALVERIFY OP_CHECKSIG not found")]
    MissingEqualVerifyCheckSig,
}

/// Check that `script` has the P2PKH shape, reporting the first element
/// that does not match.
pub fn validate_p2pkh(script: &[u8]) -> Result<(), ScriptError> {
    if script.len() < P2PKH_LEN {
        return Err(ScriptError::TooShort);
    }
    if script.len() > P2PKH_LEN {
        return Err(ScriptError::TooLong);
    }
    if script[0] != OP_DUP {
        return Err(ScriptError::MissingDup);
    }
    if script[1] != OP_HASH160 {
        return Err(ScriptError::MissingHash160);
    }
    if script[23] != OP_EQUALVERIFY || script[24] != OP_CHECKSIG {
        return Err(ScriptError::MissingEqualVerifyCheckSig);
    }
    Ok(())
}

pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_LEN);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, PUSH_20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2SH_LEN);
    script.extend_from_slice(&[OP_HASH160, PUSH_20]);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}
