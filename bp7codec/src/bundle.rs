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

use std::{
    collections::HashSet,
    convert::{TryFrom, TryInto},
    fmt::Write,
};

use binascii::hex2bin;
use log::warn;
use serde::{Deserialize, Serialize, de::Error, de::Visitor, ser::SerializeSeq};
use thiserror::Error;

use crate::{
    SerializationError, Validate,
    block::{Block, CanonicalBlock},
    blockflags::BlockFlagsError,
    bundleflags::FlagsError,
    crc::{CRCType, CrcError, calculate_crc, check_crc},
    primaryblock::PrimaryBlock,
};

/// Everything that can make a bundle entity unusable: structural and
/// semantic rule violations found by [`Validate`], missing builder
/// fields, and ill-formed wire data ([`BundleError::InvalidBundle`],
/// the error every bundle decode failure surfaces as).
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum BundleError {
    #[error("unsupported bundle protocol version {0}")]
    InvalidVersion(u64),
    #[error(transparent)]
    Flags(#[from] FlagsError),
    #[error(transparent)]
    BlockFlags(#[from] BlockFlagsError),
    #[error("fragment offset and total data length must be present together with the fragment flag")]
    InconsistentFragmentInfo,
    #[error("a fragment must carry a total application data unit length > 0")]
    MissingTotalDataLength,
    #[error("a primary block needs a destination endpoint")]
    MissingDestination,
    #[error("a dtn endpoint needs a non-empty scheme-specific part")]
    InvalidEndpoint,
    #[error("a canonical block needs block data")]
    MissingBlockData,
    #[error("a canonical block needs a block number")]
    MissingBlockNumber,
    #[error("the payload block must have block number 1")]
    PayloadMustBeBlockNumberOne,
    #[error("the payload block must not be empty")]
    EmptyPayload,
    #[error("block data does not match block type {0}")]
    TypeDataMismatch(u64),
    #[error("hop count {count} exceeds the limit {limit}")]
    HopCountExceedsLimit { limit: u8, count: u8 },
    #[error("the previous node must not be the null endpoint")]
    NullPreviousNode,
    #[error("two canonical blocks share the block number {0}")]
    DuplicateBlockNumber(u64),
    #[error("a bundle must contain a payload block")]
    MissingPayloadBlock,
    #[error("an integrity block needs at least one security target")]
    MissingSecurityTargets,
    #[error("security context flags and parameter presence do not agree")]
    ContextFlagsMismatch,
    #[error("could not decode the bundle: {0}")]
    InvalidBundle(String),
}

/// A bundle on the wire is a definite-length CBOR array of byte strings,
/// each holding the encoding of one block, the primary block first and the
/// canonical blocks in their insertion order.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Bundle {
    pub primary_block: PrimaryBlock,
    pub blocks: Vec<CanonicalBlock>,
}

struct EncodedBlock(Vec<u8>);

impl Serialize for EncodedBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl Serialize for Bundle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(1 + self.blocks.len()))?;
        let primary = serde_cbor::to_vec(&self.primary_block).map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&EncodedBlock(primary))?;
        for block in &self.blocks {
            let encoded = serde_cbor::to_vec(block).map_err(serde::ser::Error::custom)?;
            seq.serialize_element(&EncodedBlock(encoded))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Bundle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BundleVisitor;
        impl<'de> Visitor<'de> for BundleVisitor {
            type Value = Bundle;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("bundle")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut blocks: Vec<CanonicalBlock> = match seq.size_hint() {
                    Some(v) => Vec::with_capacity(v.saturating_sub(1)),
                    None => Vec::new(),
                };
                let primary_bytes: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'primary_block'"))?;
                let primary_block =
                    serde_cbor::from_slice(primary_bytes).map_err(Error::custom)?;
                while let Some(block_bytes) = seq.next_element::<&[u8]>()? {
                    blocks.push(serde_cbor::from_slice(block_bytes).map_err(Error::custom)?);
                }

                if blocks.is_empty() {
                    return Err(Error::invalid_length(0, &"must have at least one block"));
                }

                Ok(Bundle {
                    primary_block,
                    blocks,
                })
            }
        }
        deserializer.deserialize_seq(BundleVisitor)
    }
}

impl Validate for Bundle {
    fn validate(&self) -> Result<(), BundleError> {
        self.primary_block.validate()?;
        let mut numbers = HashSet::new();
        for block in &self.blocks {
            block.validate()?;
            if !numbers.insert(block.block_number) {
                return Err(BundleError::DuplicateBlockNumber(block.block_number));
            }
        }
        if !self
            .blocks
            .iter()
            .any(|b| matches!(b.block, Block::Payload(_)))
        {
            return Err(BundleError::MissingPayloadBlock);
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for Bundle {
    type Error = BundleError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        serde_cbor::from_slice(value).map_err(|e| BundleError::InvalidBundle(e.to_string()))
    }
}

impl TryFrom<Bundle> for Vec<u8> {
    type Error = SerializationError;

    fn try_from(value: Bundle) -> Result<Self, Self::Error> {
        (&value).try_into()
    }
}

impl TryFrom<&Bundle> for Vec<u8> {
    type Error = SerializationError;

    fn try_from(value: &Bundle) -> Result<Self, Self::Error> {
        serde_cbor::to_vec(value).map_err(SerializationError::Cbor)
    }
}

impl Bundle {
    /// Like `TryFrom<&[u8]>`, but canonical blocks that fail to decode are
    /// dropped instead of failing the whole bundle. Useful when data from
    /// newer implementations must still be routed; the drops are logged.
    pub fn from_slice_lenient(data: &[u8]) -> Result<Bundle, BundleError> {
        let elements: Vec<serde_cbor::Value> = serde_cbor::from_slice(data)
            .map_err(|e| BundleError::InvalidBundle(e.to_string()))?;
        let mut iter = elements.into_iter();
        let primary_block = match iter.next() {
            Some(serde_cbor::Value::Bytes(bytes)) => serde_cbor::from_slice::<PrimaryBlock>(&bytes)
                .map_err(|e| BundleError::InvalidBundle(e.to_string()))?,
            _ => {
                return Err(BundleError::InvalidBundle(String::from(
                    "the first bundle element is not an encoded primary block",
                )));
            }
        };
        let mut blocks = Vec::new();
        for element in iter {
            let serde_cbor::Value::Bytes(bytes) = element else {
                warn!("dropping a bundle element that is not an encoded block");
                continue;
            };
            match serde_cbor::from_slice::<CanonicalBlock>(&bytes) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!("dropping an undecodable canonical block: {e}"),
            }
        }
        Ok(Bundle {
            primary_block,
            blocks,
        })
    }

    pub fn as_hex(&self) -> Result<String, SerializationError> {
        let vec: Vec<u8> = self.try_into()?;
        let mut s = String::with_capacity(2 * vec.len());
        for b in vec {
            write!(&mut s, "{:02X?}", &b).or(Err(SerializationError::ConversionError))?;
        }
        Ok(s)
    }

    pub fn from_hex(hex: &str) -> Result<Bundle, BundleError> {
        let mut buffer = vec![0; hex.len() / 2];
        let decoded = hex2bin(hex.as_bytes(), &mut buffer)
            .map_err(|_| BundleError::InvalidBundle(String::from("invalid hex encoding")))?;
        (&*decoded).try_into()
    }

    /// The content of the first payload block, if any. A validated bundle
    /// always has one.
    pub fn payload(&self) -> Option<&[u8]> {
        self.blocks.iter().find_map(|b| match &b.block {
            Block::Payload(p) => Some(p.data.as_slice()),
            _ => None,
        })
    }

    /// Switches every block of the bundle to the given CRC type and stores
    /// the freshly computed values. This is the only place that fills in
    /// CRC bytes.
    pub fn set_crc(&mut self, crc: CRCType) -> Result<(), CrcError> {
        self.primary_block.crc = crc;
        self.primary_block.crc = calculate_crc(&mut self.primary_block)?;
        for block in &mut self.blocks {
            block.crc = crc;
            block.crc = calculate_crc(block)?;
        }
        Ok(())
    }

    /// True when the stored CRC of every block matches its content.
    pub fn check_crc(&mut self) -> Result<bool, CrcError> {
        if !check_crc(&mut self.primary_block)? {
            return Ok(false);
        }
        for block in &mut self.blocks {
            if !check_crc(block)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Validate,
        block::{Block, CanonicalBlock, payload_block::PayloadBlock},
        blockflags::BlockFlags,
        bundle::BundleError,
        bundleflags::BundleFlags,
        crc::{CRCType, CrcError},
        endpoint::Endpoint,
        primaryblock::PrimaryBlock,
        time::{CreationTimestamp, DtnTime},
    };

    use super::Bundle;

    fn get_test_bundle() -> Bundle {
        Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::empty(),
                crc: CRCType::NoCRC,
                destination_endpoint: Endpoint::new("dtn://dst/").unwrap(),
                source_node: Endpoint::new("dtn://src/").unwrap(),
                report_to: Endpoint::Null,
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime { timestamp: 1000 },
                    sequence_number: 1,
                },
                lifetime: 3600000,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![CanonicalBlock {
                block: Block::Payload(PayloadBlock {
                    data: vec![0x01, 0x02, 0x03],
                }),
                block_number: 1,
                block_flags: BlockFlags::empty(),
                crc: CRCType::NoCRC,
            }],
        }
    }

    #[test]
    fn roundtrip() -> Result<(), BundleError> {
        let bundle = get_test_bundle();
        let encoded: Vec<u8> = (&bundle).try_into().unwrap();
        let decoded: Bundle = encoded.as_slice().try_into()?;
        assert_eq!(decoded, bundle);
        // re-encoding is byte stable
        let reencoded: Vec<u8> = (&decoded).try_into().unwrap();
        assert_eq!(reencoded, encoded);
        Ok(())
    }

    #[test]
    fn hex_roundtrip() -> Result<(), BundleError> {
        let bundle = get_test_bundle();
        let hex = bundle.as_hex().unwrap();
        let recovered = Bundle::from_hex(&hex)?;
        assert_eq!(recovered, bundle);
        assert_eq!(recovered.as_hex().unwrap(), hex);
        Ok(())
    }

    #[test]
    fn validate_duplicate_block_numbers() {
        let mut bundle = get_test_bundle();
        let mut extra = bundle.blocks[0].clone();
        extra.block = Block::Payload(PayloadBlock { data: vec![9] });
        bundle.blocks.push(extra);
        assert_eq!(
            bundle.validate(),
            Err(BundleError::DuplicateBlockNumber(1))
        );
    }

    #[test]
    fn validate_missing_payload() {
        let mut bundle = get_test_bundle();
        bundle.blocks.clear();
        assert_eq!(bundle.validate(), Err(BundleError::MissingPayloadBlock));
    }

    #[test]
    fn decode_failures_surface_as_invalid_bundle() {
        assert!(matches!(
            Bundle::try_from(&[0xFF, 0x00][..]),
            Err(BundleError::InvalidBundle(_))
        ));
        assert!(matches!(
            Bundle::from_hex("zz"),
            Err(BundleError::InvalidBundle(_))
        ));
    }

    #[test]
    fn strict_decode_rejects_broken_blocks() {
        let bundle = get_test_bundle();
        let mut encoded: Vec<u8> = (&bundle).try_into().unwrap();
        // truncate the payload block's byte string content
        let len = encoded.len();
        encoded[len - 10] = 0x41;
        assert!(matches!(
            Bundle::try_from(encoded.as_slice()),
            Err(BundleError::InvalidBundle(_))
        ));
    }

    #[test]
    fn lenient_decode_drops_broken_blocks() -> Result<(), BundleError> {
        let bundle = get_test_bundle();

        // a second, syntactically broken canonical block: a byte string
        // that does not contain a CBOR array
        let encoded: Vec<u8> = (&bundle).try_into().unwrap();
        let mut extended = vec![0x83];
        extended.extend_from_slice(&encoded[1..]);
        extended.extend_from_slice(&[0x43, 0xFF, 0xFF, 0xFF]);

        assert!(Bundle::try_from(extended.as_slice()).is_err());
        let lenient = Bundle::from_slice_lenient(&extended)?;
        assert_eq!(lenient, bundle);
        Ok(())
    }

    #[test]
    fn set_and_check_crc() -> Result<(), CrcError> {
        for crc in [
            CRCType::NoCRC,
            CRCType::CRC16([0; 2]),
            CRCType::CRC32([0; 4]),
        ] {
            let mut bundle = get_test_bundle();
            bundle.set_crc(crc)?;
            assert!(bundle.check_crc()?);

            // setting twice does not change the bytes
            let first: Vec<u8> = (&bundle).try_into().unwrap();
            bundle.set_crc(crc)?;
            let second: Vec<u8> = (&bundle).try_into().unwrap();
            assert_eq!(first, second);
        }
        Ok(())
    }

    #[test]
    fn crc_detects_changes() -> Result<(), CrcError> {
        let mut bundle = get_test_bundle();
        bundle.set_crc(CRCType::CRC32([0; 4]))?;
        assert!(bundle.check_crc()?);
        if let Block::Payload(p) = &mut bundle.blocks[0].block {
            p.data[0] ^= 0x01;
        }
        assert!(!bundle.check_crc()?);
        Ok(())
    }

    #[test]
    fn unknown_crc_type_is_fatal_for_computation() {
        let mut bundle = get_test_bundle();
        assert!(bundle.set_crc(CRCType::Unknown(7)).is_err());
    }
}
