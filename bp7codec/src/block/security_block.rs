use serde::Serialize;

use crate::{
    SerializationError,
    security::{SecurityError, integrity_block::IntegrityBlock},
};

/// The canonical-block envelope of a block integrity block.
///
/// The abstract security block stays opaque here so that a decoded bundle
/// re-encodes to the exact bytes the MAC was computed over. Use
/// [`SecurityBlock::integrity_block`] to interpret the content.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SecurityBlock {
    pub data: Vec<u8>,
}

impl Serialize for SecurityBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.data)
    }
}

impl SecurityBlock {
    pub fn integrity_block(&self) -> Result<IntegrityBlock, SecurityError> {
        IntegrityBlock::decode(&self.data)
    }
}

impl TryFrom<&IntegrityBlock> for SecurityBlock {
    type Error = SerializationError;

    fn try_from(value: &IntegrityBlock) -> Result<Self, Self::Error> {
        Ok(SecurityBlock {
            data: value.encode()?,
        })
    }
}
