//! Script construction and the two standard verification contracts.
//!
//! Only the byte patterns needed by the node are modelled here: push
//! instructions, `CHECKSIG`, `CHECKMULTISIG` and `SYSCALL`. Everything else is
//! opaque bytecode handed to the script executor.

use crate::crypto::{hash160, PublicKey, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::UInt160;

/// Opcodes recognised by the node.
pub mod opcode {
    pub const PUSH0: u8 = 0x00;
    pub const PUSHBYTES1: u8 = 0x01;
    pub const PUSHBYTES75: u8 = 0x4B;
    pub const PUSHDATA1: u8 = 0x4C;
    pub const PUSHDATA2: u8 = 0x4D;
    pub const PUSH1: u8 = 0x51;
    pub const PUSH16: u8 = 0x60;
    pub const SYSCALL: u8 = 0x68;
    pub const CHECKSIG: u8 = 0xAC;
    pub const CHECKMULTISIG: u8 = 0xAE;
}

/// Incremental script writer.
#[derive(Debug, Default, Clone)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, op: u8) -> &mut Self {
        self.script.push(op);
        self
    }

    /// Pushes a small integer, using `PUSH0..PUSH16` where possible.
    pub fn emit_push_int(&mut self, value: usize) -> &mut Self {
        match value {
            0 => self.emit(opcode::PUSH0),
            1..=16 => self.emit(opcode::PUSH1 - 1 + value as u8),
            _ => {
                let bytes = (value as u64).to_le_bytes();
                let len = bytes.iter().rposition(|b| *b != 0).map_or(1, |i| i + 1);
                self.emit_push_bytes(&bytes[..len])
            }
        }
    }

    pub fn emit_push_bytes(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            len if len <= opcode::PUSHBYTES75 as usize => {
                self.script.push(len as u8);
            }
            len if len <= u8::MAX as usize => {
                self.script.push(opcode::PUSHDATA1);
                self.script.push(len as u8);
            }
            len => {
                self.script.push(opcode::PUSHDATA2);
                self.script.extend_from_slice(&(len as u16).to_le_bytes());
            }
        }
        self.script.extend_from_slice(data);
        self
    }

    /// Emits `SYSCALL` followed by the length-prefixed method name.
    pub fn emit_syscall(&mut self, method: &str) -> &mut Self {
        self.script.push(opcode::SYSCALL);
        self.script.push(method.len() as u8);
        self.script.extend_from_slice(method.as_bytes());
        self
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.script.clone()
    }

    pub fn into_script(self) -> Vec<u8> {
        self.script
    }
}

/// `PUSHBYTES33 <key> CHECKSIG`
pub fn signature_redeem_script(key: &PublicKey) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_bytes(key.as_bytes())
        .emit(opcode::CHECKSIG);
    builder.into_script()
}

pub fn signature_contract_hash(key: &PublicKey) -> UInt160 {
    hash160(&signature_redeem_script(key))
}

/// `PUSH m <keys sorted> PUSH n CHECKMULTISIG`
pub fn multi_sig_redeem_script(m: usize, keys: &[PublicKey]) -> Vec<u8> {
    let mut sorted = keys.to_vec();
    sorted.sort();
    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(m);
    for key in &sorted {
        builder.emit_push_bytes(key.as_bytes());
    }
    builder
        .emit_push_int(sorted.len())
        .emit(opcode::CHECKMULTISIG);
    builder.into_script()
}

/// Byzantine quorum: `N - (N - 1) / 3`.
pub fn bft_quorum(n: usize) -> usize {
    n - n.saturating_sub(1) / 3
}

/// Script hash of the M-of-N contract the given validators sign blocks with.
pub fn consensus_address(validators: &[PublicKey]) -> UInt160 {
    hash160(&multi_sig_redeem_script(bft_quorum(validators.len()), validators))
}

/// Invocation script pushing each signature in order.
pub fn invocation_script(signatures: &[[u8; SIGNATURE_SIZE]]) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    for signature in signatures {
        builder.emit_push_bytes(signature);
    }
    builder.into_script()
}

/// A verification script recognised without running a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StandardContract {
    Signature(PublicKey),
    MultiSig { m: usize, keys: Vec<PublicKey> },
}

fn read_small_int(op: u8) -> Option<usize> {
    match op {
        opcode::PUSH1..=opcode::PUSH16 => Some((op - opcode::PUSH1 + 1) as usize),
        _ => None,
    }
}

impl StandardContract {
    /// Recognises the two standard script shapes.
    pub fn parse(script: &[u8]) -> Option<Self> {
        if script.len() == PUBLIC_KEY_SIZE + 2
            && script[0] == PUBLIC_KEY_SIZE as u8
            && script[PUBLIC_KEY_SIZE + 1] == opcode::CHECKSIG
        {
            let key = PublicKey::from_bytes(&script[1..=PUBLIC_KEY_SIZE]).ok()?;
            return Some(Self::Signature(key));
        }

        let (&last, body) = script.split_last()?;
        if last != opcode::CHECKMULTISIG {
            return None;
        }
        let m = read_small_int(*body.first()?)?;
        let n = read_small_int(*body.last()?)?;
        let keys_bytes = &body[1..body.len() - 1];
        if keys_bytes.len() != n * (PUBLIC_KEY_SIZE + 1) || m == 0 || m > n {
            return None;
        }
        let mut keys = Vec::with_capacity(n);
        for chunk in keys_bytes.chunks(PUBLIC_KEY_SIZE + 1) {
            if chunk[0] != PUBLIC_KEY_SIZE as u8 {
                return None;
            }
            keys.push(PublicKey::from_bytes(&chunk[1..]).ok()?);
        }
        Some(Self::MultiSig { m, keys })
    }
}

/// Splits an invocation script made only of 64-byte signature pushes.
pub fn parse_signatures(invocation: &[u8]) -> Option<Vec<&[u8]>> {
    let mut signatures = Vec::new();
    let mut rest = invocation;
    while !rest.is_empty() {
        if rest[0] != SIGNATURE_SIZE as u8 || rest.len() < SIGNATURE_SIZE + 1 {
            return None;
        }
        signatures.push(&rest[1..=SIGNATURE_SIZE]);
        rest = &rest[SIGNATURE_SIZE + 1..];
    }
    Some(signatures)
}

/// Heuristic: does the script contain `SYSCALL <len> <method>` anywhere?
///
/// This scans raw bytes rather than decoding instructions, so a matching
/// sequence inside push data also counts and an unusual encoding of the call
/// is missed.
pub fn contains_syscall(script: &[u8], method: &str) -> bool {
    let name = method.as_bytes();
    if name.is_empty() || name.len() > u8::MAX as usize {
        return false;
    }
    let pattern_len = name.len() + 2;
    script.windows(pattern_len).any(|window| {
        window[0] == opcode::SYSCALL && window[1] as usize == name.len() && &window[2..] == name
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256, KeyPair};

    fn keys(count: u8) -> Vec<KeyPair> {
        (0..count)
            .map(|i| KeyPair::from_private_key(&sha256(&[i, 0x42])).unwrap())
            .collect()
    }

    #[test]
    fn test_quorum_values() {
        assert_eq!(bft_quorum(1), 1);
        assert_eq!(bft_quorum(4), 3);
        assert_eq!(bft_quorum(7), 5);
        assert_eq!(bft_quorum(10), 7);
        assert_eq!(bft_quorum(13), 9);
    }

    #[test]
    fn test_parse_signature_contract() {
        let key = keys(1).remove(0);
        let script = signature_redeem_script(key.public_key());
        assert_eq!(
            StandardContract::parse(&script),
            Some(StandardContract::Signature(key.public_key().clone()))
        );
    }

    #[test]
    fn test_parse_multisig_contract_sorts_keys() {
        let pairs = keys(4);
        let publics: Vec<PublicKey> = pairs.iter().rev().map(|k| k.public_key().clone()).collect();
        let script = multi_sig_redeem_script(3, &publics);
        let Some(StandardContract::MultiSig { m, keys }) = StandardContract::parse(&script) else {
            panic!("expected multisig contract");
        };
        assert_eq!(m, 3);
        let mut sorted = publics.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_parse_signatures() {
        let sigs = [[1u8; SIGNATURE_SIZE], [2u8; SIGNATURE_SIZE]];
        let script = invocation_script(&sigs);
        let parsed = parse_signatures(&script).unwrap();
        assert_eq!(parsed, vec![&sigs[0][..], &sigs[1][..]]);
        assert!(parse_signatures(&script[..10]).is_none());
    }

    #[test]
    fn test_contains_syscall_requires_exact_prefix() {
        let method = "AppChain.ChangeValidators";
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(1).emit_syscall(method);
        assert!(contains_syscall(&builder.to_vec(), method));

        // Wrong length byte.
        let mut wrong_len = vec![opcode::SYSCALL, method.len() as u8 + 1];
        wrong_len.extend_from_slice(method.as_bytes());
        assert!(!contains_syscall(&wrong_len, method));

        // Name without the SYSCALL opcode.
        let mut no_opcode = vec![opcode::PUSH0, method.len() as u8];
        no_opcode.extend_from_slice(method.as_bytes());
        assert!(!contains_syscall(&no_opcode, method));

        // A pattern hidden in push data still matches.
        let mut hidden = ScriptBuilder::new();
        hidden.emit_push_bytes(&{
            let mut data = vec![opcode::SYSCALL, method.len() as u8];
            data.extend_from_slice(method.as_bytes());
            data
        });
        assert!(contains_syscall(&hidden.to_vec(), method));
    }
}
