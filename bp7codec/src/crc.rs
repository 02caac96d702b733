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

use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
};
use thiserror::Error;

const X25: ::crc::Crc<u16> = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_SDLC);
const CASTAGNOLI: ::crc::Crc<u32> = ::crc::Crc::<u32>::new(&::crc::CRC_32_ISCSI);

#[derive(Error, Debug)]
pub enum CrcError {
    #[error("can not compute a CRC of unknown type {0}")]
    UnknownType(u64),
    #[error("could not serialize the block for CRC computation: {0}")]
    Serialization(#[from] serde_cbor::Error),
}

/// CRC type code plus, for the two real types, the big-endian value bytes
/// that ride at the end of the enclosing block. Codes other than 0 to 2 are
/// preserved but can not be computed.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum CRCType {
    #[default]
    NoCRC,
    CRC16([u8; 2]),
    CRC32([u8; 4]),
    Unknown(u64),
}

impl Serialize for CRCType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(match self {
            CRCType::NoCRC => 0,
            CRCType::CRC16(_) => 1,
            CRCType::CRC32(_) => 2,
            CRCType::Unknown(code) => *code,
        })
    }
}

impl<'de> Deserialize<'de> for CRCType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CRCVisitor;
        impl Visitor<'_> for CRCVisitor {
            type Value = CRCType;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("crc type")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(match v {
                    0 => CRCType::NoCRC,
                    1 => CRCType::CRC16([0; 2]),
                    2 => CRCType::CRC32([0; 4]),
                    code => CRCType::Unknown(code),
                })
            }
        }
        deserializer.deserialize_u64(CRCVisitor)
    }
}

/// The trailing CRC element of a block, a CBOR byte string.
pub(crate) struct TrailingCrc<'a>(pub &'a [u8]);

impl Serialize for TrailingCrc<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

impl CRCType {
    /// The value bytes to append to the block encoding, if this type
    /// carries any.
    pub fn value_bytes(&self) -> Option<&[u8]> {
        match self {
            CRCType::NoCRC | CRCType::Unknown(_) => None,
            CRCType::CRC16(x) => Some(x),
            CRCType::CRC32(x) => Some(x),
        }
    }

    /// Same type with the value bytes zeroed, the form a block must have
    /// while its CRC is being computed.
    fn empty_placeholder(self) -> Result<CRCType, CrcError> {
        match self {
            CRCType::NoCRC => Ok(CRCType::NoCRC),
            CRCType::CRC16(_) => Ok(CRCType::CRC16([0; 2])),
            CRCType::CRC32(_) => Ok(CRCType::CRC32([0; 4])),
            CRCType::Unknown(code) => Err(CrcError::UnknownType(code)),
        }
    }

    pub fn deserialize_value<'de, A>(&self, mut seq: A) -> Result<CRCType, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        match self {
            CRCType::NoCRC => Err(Error::custom(
                "a block without a CRC type must not carry a CRC value",
            )),
            CRCType::CRC16(_) => {
                let val: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for crc content"))?;
                let len = val.len();
                let arr: [u8; 2] = match val.try_into() {
                    Ok(v) => v,
                    Err(_) => {
                        return Err(Error::invalid_length(len, &"Expected 2 bytes for crc16"));
                    }
                };
                Ok(CRCType::CRC16(arr))
            }
            CRCType::CRC32(_) => {
                let val: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for crc content"))?;
                let len = val.len();
                let arr: [u8; 4] = match val.try_into() {
                    Ok(v) => v,
                    Err(_) => {
                        return Err(Error::invalid_length(len, &"Expected 4 bytes for crc32"));
                    }
                };
                Ok(CRCType::CRC32(arr))
            }
            CRCType::Unknown(code) => {
                // value bytes of an unrecognized type are consumed but can
                // not be interpreted
                let _: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for crc content"))?;
                Ok(CRCType::Unknown(*code))
            }
        }
    }
}

/// A block whose trailing element can carry a CRC over the block's own
/// canonical encoding.
pub trait CrcBlock: Serialize {
    fn crc(&self) -> CRCType;
    fn set_crc(&mut self, crc: CRCType);
}

/// Computes the CRC for the block's current type.
///
/// The stored value bytes are replaced by a zeroed placeholder of the same
/// width while the block is serialized, then restored, so the block is
/// unchanged when this returns. The computed value is returned and not
/// stored.
pub fn calculate_crc<T: CrcBlock>(block: &mut T) -> Result<CRCType, CrcError> {
    let saved = block.crc();
    if saved == CRCType::NoCRC {
        return Ok(CRCType::NoCRC);
    }
    block.set_crc(saved.empty_placeholder()?);
    let encoded = serde_cbor::to_vec(block);
    block.set_crc(saved);
    let encoded = encoded?;
    Ok(match saved {
        CRCType::CRC16(_) => CRCType::CRC16(X25.checksum(&encoded).to_be_bytes()),
        CRCType::CRC32(_) => CRCType::CRC32(CASTAGNOLI.checksum(&encoded).to_be_bytes()),
        CRCType::NoCRC | CRCType::Unknown(_) => unreachable!("handled above"),
    })
}

/// Recomputes the block's CRC and compares it against the stored value.
/// Blocks without a CRC type always pass.
pub fn check_crc<T: CrcBlock>(block: &mut T) -> Result<bool, CrcError> {
    let stored = block.crc();
    let computed = calculate_crc(block)?;
    Ok(stored == computed)
}
