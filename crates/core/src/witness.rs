//! Witnesses and native verification of the standard contracts.

use crate::crypto::hash160;
use crate::script::{parse_signatures, StandardContract};
use crate::UInt160;
use appchain_io::{helper, BinaryWriter, IoResult, MemoryReader, Serializable};

const MAX_INVOCATION_SCRIPT: usize = 1024;
const MAX_VERIFICATION_SCRIPT: usize = 1024;

/// An invocation script (arguments) paired with a verification script (contract).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Witness {
    pub invocation_script: Vec<u8>,
    pub verification_script: Vec<u8>,
}

impl Witness {
    pub fn new(invocation_script: Vec<u8>, verification_script: Vec<u8>) -> Self {
        Self {
            invocation_script,
            verification_script,
        }
    }

    pub fn script_hash(&self) -> UInt160 {
        hash160(&self.verification_script)
    }

    /// Checks that this witness authorises `message` for `expected`.
    ///
    /// The verification script must hash to `expected` and be one of the
    /// standard signature or multi-signature shapes; signatures must appear in
    /// key order, as `CHECKMULTISIG` consumes them.
    pub fn verify(&self, message: &[u8], expected: &UInt160) -> bool {
        if self.script_hash() != *expected {
            return false;
        }
        let Some(contract) = StandardContract::parse(&self.verification_script) else {
            return false;
        };
        let Some(signatures) = parse_signatures(&self.invocation_script) else {
            return false;
        };
        match contract {
            StandardContract::Signature(key) => {
                signatures.len() == 1 && key.verify(message, signatures[0])
            }
            StandardContract::MultiSig { m, keys } => {
                if signatures.len() != m {
                    return false;
                }
                let mut key_index = 0;
                for signature in signatures {
                    loop {
                        if key_index >= keys.len() {
                            return false;
                        }
                        let matched = keys[key_index].verify(message, signature);
                        key_index += 1;
                        if matched {
                            break;
                        }
                    }
                }
                true
            }
        }
    }
}

impl Serializable for Witness {
    fn size(&self) -> usize {
        helper::get_var_bytes_size(self.invocation_script.len())
            + helper::get_var_bytes_size(self.verification_script.len())
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.invocation_script);
        writer.write_var_bytes(&self.verification_script);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            invocation_script: reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?,
            verification_script: reader.read_var_bytes(MAX_VERIFICATION_SCRIPT)?,
        })
    }
}
