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

//! BPSec integrity protection (RFC 9172) with the BIB-HMAC-SHA2 security
//! context of RFC 9173.

use bitflags::bitflags;
use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeMap,
};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

use crate::SerializationError;

pub mod integrity_block;
pub mod ippt;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("an integrity block needs at least one security target")]
    MissingSecurityTargets,
    #[error("the context flags announce parameters but none are present")]
    FlagSetButNoParameter,
    #[error("context parameters are present but the context flags say absent")]
    ParameterButFlagNotSet,
    #[error("the security context parameters do not name a SHA variant")]
    MissingShaVariant,
    #[error("unknown security context parameter id {0}")]
    InvalidContextParameter(u64),
    #[error("unknown security context id {0}")]
    InvalidContextId(i64),
    #[error("could not initialize the HMAC from the given key")]
    InvalidKey,
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Selects which blocks are woven into the integrity-protected
    /// plaintext besides the target's own content.
    ///
    /// see 3.2 of RFC9173 for details.
    pub struct IntegrityScopeFlags: u16 {
        /// Cover the primary block.
        const INCLUDE_PRIMARY_BLOCK = 0x01;
        /// Cover the target block's header fields.
        const INCLUDE_TARGET_HEADER = 0x02;
        /// Cover the security block's header fields.
        const INCLUDE_SECURITY_HEADER = 0x04;
    }
}

impl Default for IntegrityScopeFlags {
    fn default() -> Self {
        IntegrityScopeFlags::all()
    }
}

impl Serialize for IntegrityScopeFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u16(self.bits())
    }
}

impl<'de> Deserialize<'de> for IntegrityScopeFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ScopeFlagsVisitor;
        impl Visitor<'_> for ScopeFlagsVisitor {
            type Value = IntegrityScopeFlags;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("integrity scope flags")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let bits = u16::try_from(v).map_err(|_| {
                    Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &"scope flags fit into 16 bits",
                    )
                })?;
                Ok(IntegrityScopeFlags::from_bits_retain(bits))
            }
        }
        deserializer.deserialize_u16(ScopeFlagsVisitor)
    }
}

/// HMAC variants of the BIB-HMAC-SHA2 context, RFC 9173 wire codes.
#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
#[repr(u64)]
pub enum ShaVariant {
    Sha256 = 5,
    Sha384 = 6,
    Sha512 = 7,
}

/// Whether the abstract security block carries context parameters.
#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
#[repr(u64)]
pub enum SecurityContextFlags {
    Absent = 0,
    Present = 1,
}

const SHA_VARIANT_PARAMETER_ID: u64 = 1;
const WRAPPED_KEY_PARAMETER_ID: u64 = 2;
const SCOPE_FLAGS_PARAMETER_ID: u64 = 3;

/// The optional parameters of a BIB-HMAC-SHA2 context, a CBOR map keyed by
/// the RFC 9173 parameter ids.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SecurityContextParameter {
    pub sha_variant: Option<ShaVariant>,
    pub wrapped_key: Option<Vec<u8>>,
    pub integrity_scope_flags: Option<IntegrityScopeFlags>,
}

struct KeyBytes(Vec<u8>);

impl Serialize for KeyBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeyBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct KeyBytesVisitor;
        impl Visitor<'_> for KeyBytesVisitor {
            type Value = KeyBytes;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("wrapped key bytes")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(KeyBytes(Vec::from(v)))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(KeyBytes(v))
            }
        }
        deserializer.deserialize_byte_buf(KeyBytesVisitor)
    }
}

impl Serialize for SecurityContextParameter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let len = usize::from(self.sha_variant.is_some())
            + usize::from(self.wrapped_key.is_some())
            + usize::from(self.integrity_scope_flags.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(variant) = self.sha_variant {
            map.serialize_entry(&SHA_VARIANT_PARAMETER_ID, &variant)?;
        }
        if let Some(key) = &self.wrapped_key {
            map.serialize_entry(&WRAPPED_KEY_PARAMETER_ID, &KeyBytes(key.clone()))?;
        }
        if let Some(flags) = self.integrity_scope_flags {
            map.serialize_entry(&SCOPE_FLAGS_PARAMETER_ID, &flags)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SecurityContextParameter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ParameterVisitor;
        impl<'de> Visitor<'de> for ParameterVisitor {
            type Value = SecurityContextParameter;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("security context parameters")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut parameter = SecurityContextParameter::default();
                while let Some(id) = map.next_key::<u64>()? {
                    match id {
                        SHA_VARIANT_PARAMETER_ID => {
                            parameter.sha_variant = Some(map.next_value()?);
                        }
                        WRAPPED_KEY_PARAMETER_ID => {
                            parameter.wrapped_key = Some(map.next_value::<KeyBytes>()?.0);
                        }
                        SCOPE_FLAGS_PARAMETER_ID => {
                            parameter.integrity_scope_flags = Some(map.next_value()?);
                        }
                        id => {
                            return Err(Error::custom(format_args!(
                                "unknown security context parameter id {id}"
                            )));
                        }
                    }
                }
                Ok(parameter)
            }
        }
        deserializer.deserialize_map(ParameterVisitor)
    }
}

#[cfg(test)]
mod tests {
    use crate::security::{IntegrityScopeFlags, SecurityContextParameter, ShaVariant};

    #[test]
    fn serialize_parameter_map() -> Result<(), serde_cbor::Error> {
        let parameter = SecurityContextParameter {
            sha_variant: Some(ShaVariant::Sha384),
            wrapped_key: None,
            integrity_scope_flags: Some(IntegrityScopeFlags::all()),
        };
        // {1: 6, 3: 7}
        assert_eq!(
            serde_cbor::to_vec(&parameter)?,
            [0xA2, 0x01, 0x06, 0x03, 0x07]
        );
        Ok(())
    }

    #[test]
    fn roundtrip_parameter_map() -> Result<(), serde_cbor::Error> {
        let parameter = SecurityContextParameter {
            sha_variant: Some(ShaVariant::Sha256),
            wrapped_key: Some(vec![0xAA, 0xBB]),
            integrity_scope_flags: Some(IntegrityScopeFlags::INCLUDE_PRIMARY_BLOCK),
        };
        let data = serde_cbor::to_vec(&parameter)?;
        let recovered: SecurityContextParameter = serde_cbor::from_slice(&data)?;
        assert_eq!(recovered, parameter);
        Ok(())
    }

    #[test]
    fn unknown_parameter_id_is_rejected() {
        // {4: 0}
        assert!(serde_cbor::from_slice::<SecurityContextParameter>(&[0xA1, 0x04, 0x00]).is_err());
    }
}
