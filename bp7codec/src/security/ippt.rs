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

use log::warn;

use crate::{
    SerializationError,
    block::CanonicalBlock,
    blockflags::BlockFlags,
    primaryblock::PrimaryBlock,
    security::{IntegrityScopeFlags, SecurityError},
};

/// Header fields of a block as they go into the plaintext: block type,
/// block number and block processing flags.
pub type BlockHeader = (u64, u64, BlockFlags);

/// Builds the integrity-protected plaintext for one security target.
///
/// The plaintext always starts with the encoded scope flags, followed by
/// the optional primary block, target header and security header as
/// selected by the flags, and ends with the target block's content. A
/// scope that asks for the primary block when none is supplied leaves it
/// out.
pub fn build(
    scope_flags: IntegrityScopeFlags,
    primary_block: Option<&PrimaryBlock>,
    security_header: Option<BlockHeader>,
    target: &CanonicalBlock,
) -> Result<Vec<u8>, SecurityError> {
    let mut ippt = serde_cbor::to_vec(&scope_flags).map_err(SerializationError::Cbor)?;

    if scope_flags.contains(IntegrityScopeFlags::INCLUDE_PRIMARY_BLOCK) {
        if let Some(primary_block) = primary_block {
            ippt.extend(serde_cbor::to_vec(primary_block).map_err(SerializationError::Cbor)?);
        } else {
            warn!("integrity scope covers the primary block but none was supplied, skipping it");
        }
    }

    if scope_flags.contains(IntegrityScopeFlags::INCLUDE_TARGET_HEADER) {
        ippt.extend(header_bytes((
            target.block.block_type(),
            target.block_number,
            target.block_flags,
        ))?);
    }

    if scope_flags.contains(IntegrityScopeFlags::INCLUDE_SECURITY_HEADER) {
        if let Some(header) = security_header {
            ippt.extend(header_bytes(header)?);
        }
    }

    ippt.extend(target.block.data_bytes()?);
    Ok(ippt)
}

fn header_bytes(header: BlockHeader) -> Result<Vec<u8>, SerializationError> {
    let (block_type, block_number, block_flags) = header;
    let mut bytes = serde_cbor::to_vec(&block_type)?;
    bytes.extend(serde_cbor::to_vec(&block_number)?);
    bytes.extend(serde_cbor::to_vec(&block_flags)?);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use crate::{
        block::{Block, CanonicalBlock, payload_block::PayloadBlock},
        blockflags::BlockFlags,
        bundleflags::BundleFlags,
        crc::CRCType,
        endpoint::Endpoint,
        primaryblock::{PrimaryBlock, PrimaryBlockBuilder},
        security::{IntegrityScopeFlags, SecurityError, ippt},
        time::{CreationTimestamp, DtnTime},
    };

    fn get_primary_block() -> PrimaryBlock {
        PrimaryBlockBuilder::new()
            .destination_endpoint(Endpoint::new("dtn://dst/").unwrap())
            .source_node(Endpoint::new("dtn://src/").unwrap())
            .bundle_processing_flags(BundleFlags::empty())
            .creation_timestamp(CreationTimestamp {
                creation_time: DtnTime { timestamp: 1000 },
                sequence_number: 0,
            })
            .build()
            .unwrap()
    }

    fn get_payload_block() -> CanonicalBlock {
        CanonicalBlock {
            block: Block::Payload(PayloadBlock {
                data: vec![0xCA, 0xFE],
            }),
            block_number: 1,
            block_flags: BlockFlags::empty(),
            crc: CRCType::NoCRC,
        }
    }

    #[test]
    fn starts_with_scope_flags() -> Result<(), SecurityError> {
        let primary = get_primary_block();
        let payload = get_payload_block();
        for scope in [
            IntegrityScopeFlags::empty(),
            IntegrityScopeFlags::INCLUDE_PRIMARY_BLOCK,
            IntegrityScopeFlags::all(),
        ] {
            let ippt = ippt::build(scope, Some(&primary), Some((11, 2, BlockFlags::empty())), &payload)?;
            assert_eq!(ippt[0] as u16, scope.bits());
        }
        Ok(())
    }

    #[test]
    fn empty_scope_is_flags_plus_content() -> Result<(), SecurityError> {
        let payload = get_payload_block();
        let ippt = ippt::build(IntegrityScopeFlags::empty(), None, None, &payload)?;
        assert_eq!(ippt, [0x00, 0xCA, 0xFE]);
        Ok(())
    }

    #[test]
    fn headers_are_bare_concatenations() -> Result<(), SecurityError> {
        let payload = get_payload_block();
        let scope =
            IntegrityScopeFlags::INCLUDE_TARGET_HEADER | IntegrityScopeFlags::INCLUDE_SECURITY_HEADER;
        let ippt = ippt::build(scope, None, Some((11, 2, BlockFlags::empty())), &payload)?;
        // scope, target header (1, 1, 0), security header (11, 2, 0), content
        assert_eq!(
            ippt,
            [0x06, 0x01, 0x01, 0x00, 0x0B, 0x02, 0x00, 0xCA, 0xFE]
        );
        Ok(())
    }

    #[test]
    fn missing_primary_is_skipped() -> Result<(), SecurityError> {
        let primary = get_primary_block();
        let payload = get_payload_block();
        let with = ippt::build(
            IntegrityScopeFlags::INCLUDE_PRIMARY_BLOCK,
            Some(&primary),
            None,
            &payload,
        )?;
        let without = ippt::build(
            IntegrityScopeFlags::INCLUDE_PRIMARY_BLOCK,
            None,
            None,
            &payload,
        )?;
        assert!(with.len() > without.len());
        assert_eq!(without, [0x01, 0xCA, 0xFE]);
        Ok(())
    }
}
