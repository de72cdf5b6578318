//! Serialization traits and utilities for wire and storage objects.

use crate::{BinaryWriter, IoResult, MemoryReader};

/// Objects with a canonical binary encoding.
pub trait Serializable {
    /// The size of the object in bytes after serialization.
    fn size(&self) -> usize;

    /// Serializes the object using the specified BinaryWriter.
    fn serialize(&self, writer: &mut BinaryWriter);

    /// Deserializes the object using the specified MemoryReader.
    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self>
    where
        Self: Sized;
}

/// Extension methods for serializable objects.
pub trait SerializableExt: Serializable {
    /// Converts the object to a byte array.
    fn to_array(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::with_capacity(self.size());
        self.serialize(&mut writer);
        writer.into_bytes()
    }

    /// Creates an object from a byte array; trailing bytes are an error.
    fn from_array(data: &[u8]) -> IoResult<Self>
    where
        Self: Sized,
    {
        let mut reader = MemoryReader::new(data);
        let value = Self::deserialize(&mut reader)?;
        reader.ensure_end()?;
        Ok(value)
    }
}

impl<T: Serializable> SerializableExt for T {}

/// Helper functions for serialization.
pub mod helper {
    use super::Serializable;

    /// Gets the size of a serialized array.
    pub fn get_array_size<T: Serializable>(items: &[T]) -> usize {
        let mut size = get_var_size(items.len() as u64);
        for item in items {
            size += item.size();
        }
        size
    }

    /// Gets the size of a var-length byte string.
    pub fn get_var_bytes_size(len: usize) -> usize {
        get_var_size(len as u64) + len
    }

    /// Gets the size of a variable-length integer.
    pub fn get_var_size(value: u64) -> usize {
        if value < 0xFD {
            1
        } else if value <= 0xFFFF {
            3
        } else if value <= 0xFFFFFFFF {
            5
        } else {
            9
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoError;

    #[derive(Debug, PartialEq)]
    struct TestStruct {
        value: u32,
    }

    impl Serializable for TestStruct {
        fn size(&self) -> usize {
            4
        }

        fn serialize(&self, writer: &mut BinaryWriter) {
            writer.write_u32(self.value);
        }

        fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
            Ok(TestStruct {
                value: reader.read_u32()?,
            })
        }
    }

    #[test]
    fn test_serializable_roundtrip() {
        let original = TestStruct { value: 0x12345678 };
        let bytes = original.to_array();
        assert_eq!(bytes.len(), original.size());
        let deserialized = TestStruct::from_array(&bytes).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_from_array_rejects_trailing_bytes() {
        let err = TestStruct::from_array(&[1, 0, 0, 0, 9]).unwrap_err();
        assert!(matches!(err, IoError::InvalidFormat(_)));
    }

    #[test]
    fn test_serialize_array() {
        let items = vec![
            TestStruct { value: 1 },
            TestStruct { value: 2 },
            TestStruct { value: 3 },
        ];

        let mut writer = BinaryWriter::new();
        writer.write_serializable_vec(&items);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), helper::get_array_size(&items));

        let mut reader = MemoryReader::new(&bytes);
        let deserialized: Vec<TestStruct> = reader.read_serializable_vec(1000).unwrap();

        assert_eq!(items, deserialized);
    }

    #[test]
    fn test_get_var_size() {
        assert_eq!(helper::get_var_size(0), 1);
        assert_eq!(helper::get_var_size(252), 1);
        assert_eq!(helper::get_var_size(253), 3);
        assert_eq!(helper::get_var_size(u16::MAX as u64), 3);
        assert_eq!(helper::get_var_size(65536), 5);
        assert_eq!(helper::get_var_size(0xFFFFFFFF), 5);
        assert_eq!(helper::get_var_size(0x100000000), 9);
    }
}
