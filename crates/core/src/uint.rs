//! Fixed-width hash types.
//!
//! Bytes are stored little-endian, as they appear on the wire. The textual form
//! is big-endian hex with a `0x` prefix.

use crate::{CoreError, CoreResult};
use appchain_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! fixed_hash {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LENGTH: usize = $len;

            #[inline]
            #[must_use]
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            #[inline]
            #[must_use]
            pub const fn from_array(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Creates a value from little-endian bytes.
            pub fn from_bytes(value: &[u8]) -> CoreResult<Self> {
                let bytes: [u8; $len] = value.try_into().map_err(|_| {
                    CoreError::invalid_format(format!(
                        "{} requires {} bytes, got {}",
                        stringify!($name),
                        $len,
                        value.len()
                    ))
                })?;
                Ok(Self(bytes))
            }

            #[inline]
            #[must_use]
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            #[inline]
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut reversed = self.0;
                reversed.reverse();
                write!(f, "0x{}", hex::encode(reversed))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> CoreResult<Self> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let mut bytes = hex::decode(digits)
                    .map_err(|e| CoreError::invalid_format(e.to_string()))?;
                bytes.reverse();
                Self::from_bytes(&bytes)
            }
        }

        impl Serializable for $name {
            fn size(&self) -> usize {
                $len
            }

            fn serialize(&self, writer: &mut BinaryWriter) {
                writer.write_bytes(&self.0);
            }

            fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
                Ok(Self(reader.read_fixed::<$len>()?))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

fixed_hash!(
    /// A 160-bit hash, used for script hashes and account addresses.
    UInt160,
    20
);

fixed_hash!(
    /// A 256-bit hash, used for block, transaction and payload hashes.
    UInt256,
    32
);

#[cfg(test)]
mod tests {
    use super::*;
    use appchain_io::SerializableExt;

    #[test]
    fn test_display_is_big_endian() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x01;
        let value = UInt160::from_array(bytes);
        assert_eq!(
            value.to_string(),
            "0x0000000000000000000000000000000000000001"
        );
        assert_eq!(value, value.to_string().parse().unwrap());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(UInt256::from_bytes(&[0u8; 31]).is_err());
        assert!(UInt256::from_bytes(&[0u8; 32]).unwrap().is_zero());
    }

    #[test]
    fn test_serde_json_uses_hex() {
        let value: UInt256 = "0x00000000000000000000000000000000000000000000000000000000000000ff"
            .parse()
            .unwrap();
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            "\"0x00000000000000000000000000000000000000000000000000000000000000ff\""
        );
        let back: UInt256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_wire_encoding() {
        let value = UInt160::from_array([7u8; 20]);
        let bytes = value.to_array();
        assert_eq!(bytes, vec![7u8; 20]);
        assert_eq!(UInt160::from_bytes(&bytes).unwrap(), value);
    }
}
