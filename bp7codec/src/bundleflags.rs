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

use bitflags::bitflags;
use serde::{Deserialize, Serialize, de::Visitor};
use thiserror::Error;

use crate::{Validate, bundle::BundleError};

/// Reserved bits 3, 4, 9, 13 and 15. Setting any of them is a validation
/// error.
pub const RESERVED_BUNDLE_FLAGS: u64 = 0xA218;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Bundle Processing Control Flags
    ///
    /// see 4.2.3 of RFC9171 for details.
    pub struct BundleFlags: u64 {
        /// The bundle is a fragment.
        const FRAGMENT = 0x0000_0001;
        /// The bundle's payload is an administrative record.
        const ADMINISTRATIVE_RECORD = 0x0000_0002;
        /// The bundle must not be fragmented.
        const MUST_NOT_FRAGMENT = 0x0000_0004;
        /// Acknowledgment by the user application is requested.
        const APPLICATION_ACKNOWLEGEMENT_REQUESTED = 0x0000_0020;
        /// Status time is requested in all status reports.
        const STATUS_TIME_REQUESTED = 0x0000_0040;
        /// Request reporting of bundle reception.
        const BUNDLE_RECEPTION_STATUS_REQUESTED = 0x0000_4000;
        /// Request reporting of bundle forwarding.
        const BUNDLE_FORWARDING_STATUS_REQUESTED = 0x0001_0000;
        /// Request reporting of bundle delivery.
        const BUNDLE_DELIVERY_STATUS_REQUESTED = 0x0002_0000;
        /// Request reporting of bundle deletion.
        const BUNDLE_DELETION_STATUS_REQUESTED = 0x0004_0000;

        // keep unknown bits so that validation can see them
        const _ = !0;
    }
}

/// Invalid bundle processing control flags. `BundleFlags::validate`
/// reports every broken rule at once instead of stopping at the first.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum FlagsError {
    #[error("bundle control flag violations: {0:?}")]
    Violations(Vec<FlagViolation>),
}

/// One rule broken by a flag combination.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum FlagViolation {
    #[error("reserved bits 0x{0:X} must not be set")]
    ReservedBitsSet(u64),
    #[error("a bundle must not be a fragment and unfragmentable at the same time")]
    FragmentContradiction,
    #[error("an administrative record must not request status reports")]
    AdminRecordWithStatusRequest,
}

impl BundleFlags {
    pub const STATUS_REQUESTS: BundleFlags = BundleFlags::BUNDLE_RECEPTION_STATUS_REQUESTED
        .union(BundleFlags::BUNDLE_FORWARDING_STATUS_REQUESTED)
        .union(BundleFlags::BUNDLE_DELIVERY_STATUS_REQUESTED)
        .union(BundleFlags::BUNDLE_DELETION_STATUS_REQUESTED);

    pub fn violations(&self) -> Vec<FlagViolation> {
        let mut violations = Vec::new();
        let reserved = self.bits() & RESERVED_BUNDLE_FLAGS;
        if reserved != 0 {
            violations.push(FlagViolation::ReservedBitsSet(reserved));
        }
        if self.contains(BundleFlags::FRAGMENT | BundleFlags::MUST_NOT_FRAGMENT) {
            violations.push(FlagViolation::FragmentContradiction);
        }
        if self.contains(BundleFlags::ADMINISTRATIVE_RECORD)
            && self.intersects(BundleFlags::STATUS_REQUESTS)
        {
            violations.push(FlagViolation::AdminRecordWithStatusRequest);
        }
        violations
    }
}

impl Serialize for BundleFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for BundleFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BundleFlagsVisitor;
        impl Visitor<'_> for BundleFlagsVisitor {
            type Value = BundleFlags;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("Bundle Flags")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(BundleFlags::from_bits_retain(v))
            }
        }
        deserializer.deserialize_u64(BundleFlagsVisitor)
    }
}

impl Validate for BundleFlags {
    fn validate(&self) -> Result<(), BundleError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(BundleError::Flags(FlagsError::Violations(violations)))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Validate,
        bundle::BundleError,
        bundleflags::{BundleFlags, FlagViolation, FlagsError},
    };

    #[test]
    fn valid_flags() {
        assert_eq!(BundleFlags::empty().validate(), Ok(()));
        assert_eq!(
            (BundleFlags::MUST_NOT_FRAGMENT | BundleFlags::BUNDLE_DELIVERY_STATUS_REQUESTED)
                .validate(),
            Ok(())
        );
    }

    #[test]
    fn reserved_bits_fail() {
        let flags = BundleFlags::from_bits_retain(0x8);
        assert_eq!(
            flags.validate(),
            Err(BundleError::Flags(FlagsError::Violations(vec![
                FlagViolation::ReservedBitsSet(0x8)
            ])))
        );
    }

    #[test]
    fn contradictions_fail() {
        let flags = BundleFlags::FRAGMENT | BundleFlags::MUST_NOT_FRAGMENT;
        assert_eq!(
            flags.violations(),
            vec![FlagViolation::FragmentContradiction]
        );
        let flags =
            BundleFlags::ADMINISTRATIVE_RECORD | BundleFlags::BUNDLE_RECEPTION_STATUS_REQUESTED;
        assert_eq!(
            flags.violations(),
            vec![FlagViolation::AdminRecordWithStatusRequest]
        );
    }

    #[test]
    fn all_violations_are_reported_together() {
        let flags = BundleFlags::from_bits_retain(
            0x200 | 0x1 | 0x4 | 0x2 | 0x4000, // reserved + contradiction + admin record
        );
        assert_eq!(flags.violations().len(), 3);
    }

    #[test]
    fn deserialization_keeps_reserved_bits() -> Result<(), serde_cbor::Error> {
        let flags: BundleFlags = serde_cbor::from_slice(&[0x19, 0xA2, 0x18])?;
        assert_eq!(flags.bits(), 0xA218);
        assert!(flags.validate().is_err());
        Ok(())
    }
}
