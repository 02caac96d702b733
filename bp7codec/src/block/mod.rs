// Copyright (C) 2023 Felix Huettner
//
// This file is part of DTRD.
//
// DTRD is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DTRD is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::convert::TryFrom;

use serde::{Deserialize, Serialize, de::Error, de::Visitor, ser::SerializeSeq};

use crate::{
    SerializationError, Validate,
    blockflags::BlockFlags,
    bundle::BundleError,
    crc::{CRCType, CrcBlock, TrailingCrc},
    endpoint::Endpoint,
};

use self::bundle_age_block::BundleAgeBlock;
use self::hop_count_block::HopCountBlock;
use self::previous_node_block::PreviousNodeBlock;
use self::security_block::SecurityBlock;
use self::{payload_block::PayloadBlock, unkown_block::UnkownBlock};
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};

pub mod bundle_age_block;
pub mod hop_count_block;
pub mod payload_block;
pub mod previous_node_block;
pub mod security_block;
pub mod unkown_block;

#[derive(
    Debug,
    Serialize_repr,
    Deserialize_repr,
    PartialEq,
    Eq,
    Clone,
    Copy,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u64)]
enum BlockType {
    Payload = 1,
    PreviousNode = 6,
    BundleAge = 7,
    HopCount = 10,
    Integrity = 11,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Block {
    Payload(PayloadBlock),
    PreviousNode(PreviousNodeBlock),
    BundleAge(BundleAgeBlock),
    HopCount(HopCountBlock),
    Integrity(SecurityBlock),
    Unkown(UnkownBlock),
}

impl Block {
    pub fn block_type(&self) -> u64 {
        match self {
            Block::Payload(_) => BlockType::Payload.into(),
            Block::PreviousNode(_) => BlockType::PreviousNode.into(),
            Block::BundleAge(_) => BlockType::BundleAge.into(),
            Block::HopCount(_) => BlockType::HopCount.into(),
            Block::Integrity(_) => BlockType::Integrity.into(),
            Block::Unkown(b) => b.block_type,
        }
    }

    /// The content of the block's data byte string, without the byte
    /// string header.
    pub fn data_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(match self {
            Block::Payload(b) => b.data.clone(),
            Block::Integrity(b) => b.data.clone(),
            Block::Unkown(b) => b.data.clone(),
            Block::BundleAge(b) => serde_cbor::to_vec(&b.age)?,
            Block::HopCount(b) => serde_cbor::to_vec(&(b.limit, b.count))?,
            Block::PreviousNode(b) => serde_cbor::to_vec(&b.previous_node)?,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CanonicalBlock {
    pub block: Block,
    pub block_number: u64,
    pub block_flags: BlockFlags,
    pub crc: CRCType,
}

impl Serialize for CanonicalBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let len = if self.crc.value_bytes().is_some() {
            6
        } else {
            5
        };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.block.block_type())?;
        seq.serialize_element(&self.block_number)?;
        seq.serialize_element(&self.block_flags)?;
        seq.serialize_element(&self.crc)?;
        match &self.block {
            Block::Payload(b) => {
                seq.serialize_element(&b)?;
            }
            Block::PreviousNode(b) => {
                seq.serialize_element(&b)?;
            }
            Block::BundleAge(b) => {
                seq.serialize_element(&b)?;
            }
            Block::HopCount(b) => {
                seq.serialize_element(&b)?;
            }
            Block::Integrity(b) => {
                seq.serialize_element(&b)?;
            }
            Block::Unkown(b) => {
                seq.serialize_element(&b)?;
            }
        }
        if let Some(value) = self.crc.value_bytes() {
            seq.serialize_element(&TrailingCrc(value))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CanonicalBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BlockVisitor;
        impl<'de> Visitor<'de> for BlockVisitor {
            type Value = CanonicalBlock;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("block")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let size = seq.size_hint().ok_or_else(|| {
                    Error::custom("Canonical Block must know the length of its contents")
                })?;
                if !(5..=6).contains(&size) {
                    return Err(Error::invalid_length(size, &"Block has 5 to 6 elements"));
                }

                let block_type_num: u64 = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'block_type'"))?;
                let block_type = BlockType::try_from(block_type_num);

                let block_number = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'block_number'"))?;
                let block_flags = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'block_flags'"))?;
                let mut crc: CRCType = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'crc_type'"))?;

                let data_bytes: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'data'"))?;
                let data: Vec<u8> = Vec::from(data_bytes);
                let block = match &block_type {
                    Ok(BlockType::Payload) => Block::Payload(PayloadBlock { data }),
                    Ok(BlockType::PreviousNode) => Block::PreviousNode(
                        PreviousNodeBlock::try_from(data).map_err(Error::custom)?,
                    ),
                    Ok(BlockType::BundleAge) => {
                        Block::BundleAge(BundleAgeBlock::try_from(data).map_err(Error::custom)?)
                    }
                    Ok(BlockType::HopCount) => {
                        Block::HopCount(HopCountBlock::try_from(data).map_err(Error::custom)?)
                    }
                    Ok(BlockType::Integrity) => Block::Integrity(SecurityBlock { data }),
                    Err(_) => Block::Unkown(UnkownBlock {
                        block_type: block_type_num,
                        data,
                    }),
                };

                if size == 6 {
                    crc = crc.deserialize_value(seq)?;
                }

                Ok(CanonicalBlock {
                    block,
                    block_number,
                    block_flags,
                    crc,
                })
            }
        }
        deserializer.deserialize_seq(BlockVisitor)
    }
}

impl Validate for CanonicalBlock {
    fn validate(&self) -> Result<(), BundleError> {
        self.block_flags.validate()?;
        match &self.block {
            Block::Payload(b) => {
                if self.block_number != 1 {
                    return Err(BundleError::PayloadMustBeBlockNumberOne);
                }
                if b.data.is_empty() {
                    return Err(BundleError::EmptyPayload);
                }
            }
            Block::HopCount(b) => {
                if b.count > b.limit {
                    return Err(BundleError::HopCountExceedsLimit {
                        limit: b.limit,
                        count: b.count,
                    });
                }
            }
            Block::PreviousNode(b) => {
                if b.previous_node.is_null_endpoint() {
                    return Err(BundleError::NullPreviousNode);
                }
                b.previous_node.validate()?;
            }
            Block::Unkown(b) => {
                if BlockType::try_from(b.block_type).is_ok() {
                    return Err(BundleError::TypeDataMismatch(b.block_type));
                }
            }
            Block::BundleAge(_) | Block::Integrity(_) => {}
        }
        Ok(())
    }
}

impl CrcBlock for CanonicalBlock {
    fn crc(&self) -> CRCType {
        self.crc
    }

    fn set_crc(&mut self, crc: CRCType) {
        self.crc = crc;
    }
}

impl CanonicalBlock {
    /// Bumps the hop count. Whether the limit is now exceeded is the
    /// caller's concern, see [`CanonicalBlock::hop_count_exceeded`].
    pub fn increase_hop_count(&mut self) {
        if let Block::HopCount(b) = &mut self.block {
            b.count = b.count.saturating_add(1);
        }
    }

    pub fn hop_count_exceeded(&self) -> bool {
        matches!(&self.block, Block::HopCount(b) if b.count > b.limit)
    }

    pub fn update_bundle_age(&mut self, age: u64) {
        if let Block::BundleAge(b) = &mut self.block {
            b.age = age;
        }
    }

    pub fn update_previous_node(&mut self, endpoint: Endpoint) {
        if let Block::PreviousNode(b) = &mut self.block {
            b.previous_node = endpoint;
        }
    }
}

/// Assembles a canonical block; flags default to empty and the CRC to none.
#[derive(Debug, Clone, Default)]
pub struct CanonicalBlockBuilder {
    block: Option<Block>,
    block_number: Option<u64>,
    block_flags: BlockFlags,
    crc: CRCType,
}

impl CanonicalBlockBuilder {
    pub fn new() -> Self {
        CanonicalBlockBuilder::default()
    }

    pub fn block(mut self, block: Block) -> Self {
        self.block = Some(block);
        self
    }

    pub fn block_number(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }

    pub fn block_flags(mut self, block_flags: BlockFlags) -> Self {
        self.block_flags = block_flags;
        self
    }

    pub fn crc(mut self, crc: CRCType) -> Self {
        self.crc = crc;
        self
    }

    pub fn build(self) -> Result<CanonicalBlock, BundleError> {
        let canonical = CanonicalBlock {
            block: self.block.ok_or(BundleError::MissingBlockData)?,
            block_number: self
                .block_number
                .ok_or(BundleError::MissingBlockNumber)?,
            block_flags: self.block_flags,
            crc: self.crc,
        };
        canonical.validate()?;
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Validate,
        block::{
            Block, CanonicalBlock, CanonicalBlockBuilder, bundle_age_block::BundleAgeBlock,
            hop_count_block::HopCountBlock, payload_block::PayloadBlock,
            previous_node_block::PreviousNodeBlock, unkown_block::UnkownBlock,
        },
        blockflags::BlockFlags,
        bundle::BundleError,
        crc::CRCType,
        endpoint::Endpoint,
    };

    const PAYLOAD_BLOCK_SERIALIZATION: &[u8] = &[
        0x85, 0x01, 0x01, 0x00, 0x00, 0x44, 0x43, 0x41, 0x42, 0x43,
    ];

    fn get_payload_block() -> CanonicalBlock {
        CanonicalBlock {
            block: Block::Payload(PayloadBlock {
                data: vec![0x43, 0x41, 0x42, 0x43],
            }),
            block_number: 1,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        }
    }

    #[test]
    fn serialize_payload_block() -> Result<(), serde_cbor::Error> {
        assert_eq!(
            serde_cbor::to_vec(&get_payload_block())?,
            PAYLOAD_BLOCK_SERIALIZATION
        );
        Ok(())
    }

    #[test]
    fn deserialize_payload_block() -> Result<(), serde_cbor::Error> {
        let val: CanonicalBlock = serde_cbor::from_slice(PAYLOAD_BLOCK_SERIALIZATION)?;
        assert_eq!(val, get_payload_block());
        Ok(())
    }

    const HOP_COUNT_SERIALIZATION: &[u8] = &[
        0x85, 0x0A, 0x02, 0x00, 0x00, 0x44, 0x82, 0x18, 0x20, 0x00,
    ];

    fn get_hop_count_block() -> CanonicalBlock {
        CanonicalBlock {
            block: Block::HopCount(HopCountBlock {
                limit: 32,
                count: 0,
            }),
            block_number: 2,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        }
    }

    #[test]
    fn serialize_hop_count_block() -> Result<(), serde_cbor::Error> {
        assert_eq!(
            serde_cbor::to_vec(&get_hop_count_block())?,
            HOP_COUNT_SERIALIZATION
        );
        Ok(())
    }

    #[test]
    fn deserialize_hop_count_block() -> Result<(), serde_cbor::Error> {
        let val: CanonicalBlock = serde_cbor::from_slice(HOP_COUNT_SERIALIZATION)?;
        assert_eq!(val, get_hop_count_block());
        Ok(())
    }

    #[test]
    fn roundtrip_bundle_age_block() -> Result<(), serde_cbor::Error> {
        let block = CanonicalBlock {
            block: Block::BundleAge(BundleAgeBlock { age: 123456 }),
            block_number: 3,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        let data = serde_cbor::to_vec(&block)?;
        let val: CanonicalBlock = serde_cbor::from_slice(&data)?;
        assert_eq!(val, block);
        Ok(())
    }

    #[test]
    fn roundtrip_previous_node_block() -> Result<(), serde_cbor::Error> {
        let block = CanonicalBlock {
            block: Block::PreviousNode(PreviousNodeBlock {
                previous_node: Endpoint::new("dtn://node1/relay").unwrap(),
            }),
            block_number: 4,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        let data = serde_cbor::to_vec(&block)?;
        let val: CanonicalBlock = serde_cbor::from_slice(&data)?;
        assert_eq!(val, block);
        Ok(())
    }

    #[test]
    fn roundtrip_unkown_block() -> Result<(), serde_cbor::Error> {
        let block = CanonicalBlock {
            block: Block::Unkown(UnkownBlock {
                block_type: 192,
                data: vec![1, 2, 3, 4],
            }),
            block_number: 5,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        let data = serde_cbor::to_vec(&block)?;
        let val: CanonicalBlock = serde_cbor::from_slice(&data)?;
        assert_eq!(val, block);
        Ok(())
    }

    #[test]
    fn validate_payload_position() {
        let mut block = get_payload_block();
        block.block_number = 2;
        assert_eq!(
            block.validate(),
            Err(BundleError::PayloadMustBeBlockNumberOne)
        );
    }

    #[test]
    fn validate_empty_payload() {
        let mut block = get_payload_block();
        block.block = Block::Payload(PayloadBlock { data: Vec::new() });
        assert_eq!(block.validate(), Err(BundleError::EmptyPayload));
    }

    #[test]
    fn validate_hop_count_limit() {
        let block = CanonicalBlock {
            block: Block::HopCount(HopCountBlock { limit: 5, count: 6 }),
            block_number: 2,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        assert_eq!(
            block.validate(),
            Err(BundleError::HopCountExceedsLimit { limit: 5, count: 6 })
        );
        assert!(block.hop_count_exceeded());
    }

    #[test]
    fn validate_null_previous_node() {
        let block = CanonicalBlock {
            block: Block::PreviousNode(PreviousNodeBlock {
                previous_node: Endpoint::Null,
            }),
            block_number: 2,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        assert_eq!(block.validate(), Err(BundleError::NullPreviousNode));
    }

    #[test]
    fn mutators_only_touch_matching_blocks() {
        let mut hop = get_hop_count_block();
        hop.increase_hop_count();
        hop.increase_hop_count();
        assert!(matches!(&hop.block, Block::HopCount(b) if b.count == 2));
        hop.update_bundle_age(99);
        assert!(matches!(&hop.block, Block::HopCount(b) if b.count == 2));

        let mut age = CanonicalBlock {
            block: Block::BundleAge(BundleAgeBlock { age: 0 }),
            block_number: 3,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        };
        age.update_bundle_age(1000);
        assert!(matches!(&age.block, Block::BundleAge(b) if b.age == 1000));
        age.increase_hop_count();
        assert!(matches!(&age.block, Block::BundleAge(b) if b.age == 1000));
    }

    #[test]
    fn builder() -> Result<(), BundleError> {
        let block = CanonicalBlockBuilder::new()
            .block(Block::Payload(PayloadBlock {
                data: vec![1, 2, 3],
            }))
            .block_number(1)
            .build()?;
        assert_eq!(block.block_flags, BlockFlags::empty());
        assert_eq!(block.crc, CRCType::NoCRC);
        assert_eq!(
            CanonicalBlockBuilder::new().build(),
            Err(BundleError::MissingBlockData)
        );
        Ok(())
    }
}
