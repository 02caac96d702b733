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

use hmac::{Hmac, Mac};
use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeSeq,
};
use sha2::{Sha256, Sha384, Sha512};

use crate::{
    SerializationError, Validate,
    bundle::BundleError,
    endpoint::Endpoint,
    security::{SecurityContextFlags, SecurityContextParameter, SecurityError, ShaVariant},
};

/// The only security context this implementation speaks, RFC 9173
/// BIB-HMAC-SHA2.
pub const BIB_HMAC_SHA2_CONTEXT_ID: i16 = 1;

/// One entry of the security results: the covered block's number and the
/// MAC computed over its plaintext, `[target, mac]` on the wire.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SecurityResult {
    pub target: u64,
    pub value: Vec<u8>,
}

struct ResultBytes<'a>(&'a [u8]);

impl Serialize for ResultBytes<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for SecurityResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.target)?;
        seq.serialize_element(&ResultBytes(&self.value))?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SecurityResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SecurityResultVisitor;
        impl<'de> Visitor<'de> for SecurityResultVisitor {
            type Value = SecurityResult;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("security result")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let target = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'target'"))?;
                let value: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'value'"))?;
                Ok(SecurityResult {
                    target,
                    value: Vec::from(value),
                })
            }
        }
        deserializer.deserialize_seq(SecurityResultVisitor)
    }
}

/// A block integrity block: HMACs over selected blocks of a bundle.
///
/// On the wire this is not one CBOR item but the concatenation of six:
/// the target list, the context id (as a CBOR negative int), the context
/// flags, the security source, the parameter map (or null) and the result
/// array. The concatenation rides in the byte string of a canonical block
/// of type 11.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct IntegrityBlock {
    pub security_targets: Vec<u64>,
    pub security_context_id: i16,
    pub security_context_flags: SecurityContextFlags,
    pub security_source: Endpoint,
    pub security_context_parameters: Option<SecurityContextParameter>,
    pub security_results: Vec<Vec<SecurityResult>>,
}

impl IntegrityBlock {
    pub fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        let mut out = serde_cbor::to_vec(&self.security_targets)?;
        out.extend(serde_cbor::to_vec(
            &-(i64::from(self.security_context_id) + 1),
        )?);
        out.extend(serde_cbor::to_vec(&self.security_context_flags)?);
        out.extend(serde_cbor::to_vec(&self.security_source)?);
        match &self.security_context_parameters {
            Some(parameters) => out.extend(serde_cbor::to_vec(parameters)?),
            None => out.extend(serde_cbor::to_vec(&None::<SecurityContextParameter>)?),
        }
        out.extend(serde_cbor::to_vec(&self.security_results)?);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<IntegrityBlock, SecurityError> {
        let mut deserializer = serde_cbor::Deserializer::from_slice(data);
        let security_targets = Vec::<u64>::deserialize(&mut deserializer)
            .map_err(SerializationError::Cbor)?;
        let raw_context_id =
            i64::deserialize(&mut deserializer).map_err(SerializationError::Cbor)?;
        if raw_context_id >= 0 {
            return Err(SecurityError::InvalidContextId(raw_context_id));
        }
        let security_context_id = i16::try_from(-raw_context_id - 1)
            .map_err(|_| SecurityError::InvalidContextId(raw_context_id))?;
        let security_context_flags = SecurityContextFlags::deserialize(&mut deserializer)
            .map_err(SerializationError::Cbor)?;
        let security_source =
            Endpoint::deserialize(&mut deserializer).map_err(SerializationError::Cbor)?;
        let security_context_parameters =
            Option::<SecurityContextParameter>::deserialize(&mut deserializer)
                .map_err(SerializationError::Cbor)?;
        let security_results = Vec::<Vec<SecurityResult>>::deserialize(&mut deserializer)
            .map_err(SerializationError::Cbor)?;
        deserializer.end().map_err(SerializationError::Cbor)?;
        Ok(IntegrityBlock {
            security_targets,
            security_context_id,
            security_context_flags,
            security_source,
            security_context_parameters,
            security_results,
        })
    }

    fn sha_variant(&self) -> Result<ShaVariant, SecurityError> {
        self.security_context_parameters
            .as_ref()
            .and_then(|p| p.sha_variant)
            .ok_or(SecurityError::MissingShaVariant)
    }

    /// Computes one MAC per `(target block number, plaintext)` pair with
    /// the context's SHA variant and appends a single-entry result list
    /// for each, in the order given.
    pub fn compute_hmac(
        &mut self,
        key: &[u8],
        ippts: &[(u64, Vec<u8>)],
    ) -> Result<(), SecurityError> {
        let variant = self.sha_variant()?;
        for (target, ippt) in ippts {
            let value = hmac_digest(variant, key, ippt)?;
            self.security_results.push(vec![SecurityResult {
                target: *target,
                value,
            }]);
        }
        Ok(())
    }
}

impl Validate for IntegrityBlock {
    fn validate(&self) -> Result<(), BundleError> {
        if self.security_targets.is_empty() {
            return Err(BundleError::MissingSecurityTargets);
        }
        let present = self.security_context_flags == SecurityContextFlags::Present;
        if present != self.security_context_parameters.is_some() {
            return Err(BundleError::ContextFlagsMismatch);
        }
        Ok(())
    }
}

fn hmac_digest(
    variant: ShaVariant,
    key: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, SecurityError> {
    Ok(match variant {
        ShaVariant::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).map_err(|_| SecurityError::InvalidKey)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        ShaVariant::Sha384 => {
            let mut mac =
                Hmac::<Sha384>::new_from_slice(key).map_err(|_| SecurityError::InvalidKey)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        ShaVariant::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).map_err(|_| SecurityError::InvalidKey)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    })
}

/// Assembles an integrity block. The context flags follow the parameter
/// presence unless set explicitly; a mismatch fails `build`.
#[derive(Debug, Clone)]
pub struct IntegrityBlockBuilder {
    security_targets: Vec<u64>,
    security_context_flags: Option<SecurityContextFlags>,
    security_source: Endpoint,
    security_context_parameters: Option<SecurityContextParameter>,
    security_results: Vec<Vec<SecurityResult>>,
}

impl Default for IntegrityBlockBuilder {
    fn default() -> Self {
        IntegrityBlockBuilder {
            security_targets: Vec::new(),
            security_context_flags: None,
            security_source: Endpoint::Null,
            security_context_parameters: None,
            security_results: Vec::new(),
        }
    }
}

impl IntegrityBlockBuilder {
    pub fn new() -> Self {
        IntegrityBlockBuilder::default()
    }

    pub fn security_targets(mut self, targets: Vec<u64>) -> Self {
        self.security_targets = targets;
        self
    }

    pub fn security_context_flags(mut self, flags: SecurityContextFlags) -> Self {
        self.security_context_flags = Some(flags);
        self
    }

    pub fn security_source(mut self, source: Endpoint) -> Self {
        self.security_source = source;
        self
    }

    pub fn security_context_parameters(mut self, parameters: SecurityContextParameter) -> Self {
        self.security_context_parameters = Some(parameters);
        self
    }

    pub fn security_results(mut self, results: Vec<Vec<SecurityResult>>) -> Self {
        self.security_results = results;
        self
    }

    pub fn build(self) -> Result<IntegrityBlock, SecurityError> {
        if self.security_targets.is_empty() {
            return Err(SecurityError::MissingSecurityTargets);
        }
        let security_context_flags = self.security_context_flags.unwrap_or(
            if self.security_context_parameters.is_some() {
                SecurityContextFlags::Present
            } else {
                SecurityContextFlags::Absent
            },
        );
        match security_context_flags {
            SecurityContextFlags::Present if self.security_context_parameters.is_none() => {
                return Err(SecurityError::FlagSetButNoParameter);
            }
            SecurityContextFlags::Absent if self.security_context_parameters.is_some() => {
                return Err(SecurityError::ParameterButFlagNotSet);
            }
            _ => {}
        }
        Ok(IntegrityBlock {
            security_targets: self.security_targets,
            security_context_id: BIB_HMAC_SHA2_CONTEXT_ID,
            security_context_flags,
            security_source: self.security_source,
            security_context_parameters: self.security_context_parameters,
            security_results: self.security_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        endpoint::Endpoint,
        security::{
            IntegrityScopeFlags, SecurityContextFlags, SecurityContextParameter, SecurityError,
            ShaVariant,
            integrity_block::{IntegrityBlock, IntegrityBlockBuilder, SecurityResult},
        },
    };

    fn get_parameters() -> SecurityContextParameter {
        SecurityContextParameter {
            sha_variant: Some(ShaVariant::Sha384),
            wrapped_key: None,
            integrity_scope_flags: Some(IntegrityScopeFlags::all()),
        }
    }

    fn get_test_block() -> IntegrityBlock {
        IntegrityBlockBuilder::new()
            .security_targets(vec![1])
            .security_source(Endpoint::new("dtn://sec/").unwrap())
            .security_context_parameters(get_parameters())
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_targets() {
        assert!(matches!(
            IntegrityBlockBuilder::new().build(),
            Err(SecurityError::MissingSecurityTargets)
        ));
    }

    #[test]
    fn builder_rejects_flag_parameter_mismatch() {
        assert!(matches!(
            IntegrityBlockBuilder::new()
                .security_targets(vec![1])
                .security_context_flags(SecurityContextFlags::Present)
                .build(),
            Err(SecurityError::FlagSetButNoParameter)
        ));
        assert!(matches!(
            IntegrityBlockBuilder::new()
                .security_targets(vec![1])
                .security_context_flags(SecurityContextFlags::Absent)
                .security_context_parameters(get_parameters())
                .build(),
            Err(SecurityError::ParameterButFlagNotSet)
        ));
    }

    #[test]
    fn builder_derives_flags_from_parameters() {
        let block = get_test_block();
        assert_eq!(
            block.security_context_flags,
            SecurityContextFlags::Present
        );
        let bare = IntegrityBlockBuilder::new()
            .security_targets(vec![1])
            .build()
            .unwrap();
        assert_eq!(bare.security_context_flags, SecurityContextFlags::Absent);
    }

    #[test]
    fn encode_starts_with_targets_and_negative_context_id() {
        let block = get_test_block();
        let data = block.encode().unwrap();
        // [1], -2, 1
        assert_eq!(&data[..4], &[0x81, 0x01, 0x21, 0x01]);
    }

    #[test]
    fn roundtrip() -> Result<(), SecurityError> {
        let mut block = get_test_block();
        block.compute_hmac(b"0123456789abcdef", &[(1, vec![0x00, 0xCA, 0xFE])])?;
        let data = block.encode().map_err(SecurityError::Serialization)?;
        let recovered = IntegrityBlock::decode(&data)?;
        assert_eq!(recovered, block);
        Ok(())
    }

    #[test]
    fn hmac_is_deterministic_and_sized() -> Result<(), SecurityError> {
        let ippt = vec![0x07, 0x01, 0x02, 0x03];
        let mut lengths = Vec::new();
        for variant in [ShaVariant::Sha256, ShaVariant::Sha384, ShaVariant::Sha512] {
            let build = || {
                let mut block = IntegrityBlockBuilder::new()
                    .security_targets(vec![1])
                    .security_context_parameters(SecurityContextParameter {
                        sha_variant: Some(variant),
                        ..SecurityContextParameter::default()
                    })
                    .build()
                    .unwrap();
                block.compute_hmac(b"key", &[(1, ippt.clone())]).unwrap();
                block
            };
            let a = build();
            let b = build();
            assert_eq!(a.security_results, b.security_results);
            lengths.push(a.security_results[0][0].value.len());
        }
        assert_eq!(lengths, [32, 48, 64]);
        Ok(())
    }

    #[test]
    fn missing_sha_variant_is_an_error() {
        let mut block = IntegrityBlockBuilder::new()
            .security_targets(vec![1])
            .build()
            .unwrap();
        assert!(matches!(
            block.compute_hmac(b"key", &[(1, vec![0x00])]),
            Err(SecurityError::MissingShaVariant)
        ));
    }

    #[test]
    fn results_keep_one_entry_per_target() -> Result<(), SecurityError> {
        let mut block = IntegrityBlockBuilder::new()
            .security_targets(vec![1, 2])
            .security_context_parameters(get_parameters())
            .build()
            .unwrap();
        block.compute_hmac(b"key", &[(1, vec![0x00]), (2, vec![0x01])])?;
        assert_eq!(block.security_results.len(), 2);
        assert_eq!(block.security_results[0].len(), 1);
        assert_eq!(block.security_results[0][0].target, 1);
        assert_eq!(block.security_results[1][0].target, 2);
        Ok(())
    }

    #[test]
    fn decode_rejects_unsigned_context_id() {
        let block = get_test_block();
        let mut data = block.encode().unwrap();
        // replace the negative context id with an unsigned 1
        data[2] = 0x01;
        assert!(matches!(
            IntegrityBlock::decode(&data),
            Err(SecurityError::InvalidContextId(1))
        ));
    }

    #[test]
    fn security_result_wire_form() -> Result<(), serde_cbor::Error> {
        let result = SecurityResult {
            target: 1,
            value: vec![0xAB, 0xCD],
        };
        assert_eq!(serde_cbor::to_vec(&result)?, [0x82, 0x01, 0x42, 0xAB, 0xCD]);
        Ok(())
    }
}
