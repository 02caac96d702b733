use serde::{Deserialize, Serialize, de::Error, de::Visitor, ser::SerializeSeq};

use crate::{
    Validate,
    bundle::BundleError,
    bundleflags::BundleFlags,
    crc::{CRCType, CrcBlock, TrailingCrc},
    endpoint::Endpoint,
    time::{CreationTimestamp, DtnTime},
};

const DEFAULT_LIFETIME: u64 = 3_600_000;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PrimaryBlock {
    pub version: u64,
    pub bundle_processing_flags: BundleFlags,
    pub crc: CRCType,
    pub destination_endpoint: Endpoint,
    pub source_node: Endpoint,
    pub report_to: Endpoint,
    pub creation_timestamp: CreationTimestamp,
    pub lifetime: u64,
    pub fragment_offset: Option<u64>,
    pub total_data_length: Option<u64>,
}

impl Serialize for PrimaryBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut len = 8;
        if self.fragment_offset.is_some() {
            len += 2;
        }
        if self.crc.value_bytes().is_some() {
            len += 1;
        }
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.version)?;
        seq.serialize_element(&self.bundle_processing_flags)?;
        seq.serialize_element(&self.crc)?;
        seq.serialize_element(&self.destination_endpoint)?;
        seq.serialize_element(&self.source_node)?;
        seq.serialize_element(&self.report_to)?;
        seq.serialize_element(&self.creation_timestamp)?;
        seq.serialize_element(&self.lifetime)?;
        if self.fragment_offset.is_some() {
            seq.serialize_element(&self.fragment_offset.unwrap())?;
            seq.serialize_element(&self.total_data_length.unwrap())?;
        }
        if let Some(value) = self.crc.value_bytes() {
            seq.serialize_element(&TrailingCrc(value))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for PrimaryBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrimaryBlockVisitor;
        impl<'de> Visitor<'de> for PrimaryBlockVisitor {
            type Value = PrimaryBlock;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("primary block")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let size = seq.size_hint().ok_or_else(|| {
                    Error::custom("Primary block must know the length of its contents")
                })?;
                if !(8..=11).contains(&size) {
                    return Err(Error::invalid_length(
                        size,
                        &"Primary block has 8 to 11 elements",
                    ));
                }
                let version = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'version'"))?;
                let bundle_processing_flags = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'bundle_processing_flags'"))?;
                let mut crc: CRCType = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'crc_type'"))?;
                let destination_endpoint = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'destination_endpoint'"))?;
                let source_node = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'source_node'"))?;
                let report_to = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'report_to'"))?;
                let creation_timestamp = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'creation_timestamp'"))?;
                let lifetime = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'lifetime'"))?;

                let (fragment_offset, total_data_length) = if size == 10 || size == 11 {
                    (
                        Some(
                            seq.next_element()?
                                .ok_or(Error::custom("Error for field 'fragment_offset'"))?,
                        ),
                        Some(
                            seq.next_element()?
                                .ok_or(Error::custom("Error for field 'total_data_length'"))?,
                        ),
                    )
                } else {
                    (None, None)
                };

                if size == 9 || size == 11 {
                    crc = crc.deserialize_value(seq)?;
                }

                Ok(PrimaryBlock {
                    version,
                    bundle_processing_flags,
                    crc,
                    destination_endpoint,
                    source_node,
                    report_to,
                    creation_timestamp,
                    lifetime,
                    fragment_offset,
                    total_data_length,
                })
            }
        }
        deserializer.deserialize_seq(PrimaryBlockVisitor)
    }
}

impl Validate for PrimaryBlock {
    fn validate(&self) -> Result<(), BundleError> {
        if self.version != 7 {
            return Err(BundleError::InvalidVersion(self.version));
        }
        self.bundle_processing_flags.validate()?;
        let is_fragment = self
            .bundle_processing_flags
            .contains(BundleFlags::FRAGMENT);
        if is_fragment != self.fragment_offset.is_some()
            || self.fragment_offset.is_some() != self.total_data_length.is_some()
        {
            return Err(BundleError::InconsistentFragmentInfo);
        }
        if is_fragment && self.total_data_length == Some(0) {
            return Err(BundleError::MissingTotalDataLength);
        }
        self.source_node.validate()?;
        self.destination_endpoint.validate()?;
        self.report_to.validate()?;
        Ok(())
    }
}

impl CrcBlock for PrimaryBlock {
    fn crc(&self) -> CRCType {
        self.crc
    }

    fn set_crc(&mut self, crc: CRCType) {
        self.crc = crc;
    }
}

impl PrimaryBlock {
    pub fn has_fragmentation(&self) -> bool {
        self.bundle_processing_flags
            .contains(BundleFlags::FRAGMENT)
    }

    /// Bundles with a lifetime of 0 never expire.
    pub fn has_expired_at(&self, now: DtnTime) -> bool {
        if self.lifetime == 0 {
            return false;
        }
        now.timestamp
            .checked_sub(self.creation_timestamp.creation_time.timestamp)
            .is_some_and(|age| age >= self.lifetime)
    }

    pub fn has_expired(&self) -> bool {
        self.has_expired_at(DtnTime::now())
    }
}

/// Assembles a primary block field by field; everything except the
/// destination has a usable default.
#[derive(Debug, Clone)]
pub struct PrimaryBlockBuilder {
    bundle_processing_flags: BundleFlags,
    crc: CRCType,
    destination_endpoint: Option<Endpoint>,
    source_node: Endpoint,
    report_to: Endpoint,
    creation_timestamp: Option<CreationTimestamp>,
    lifetime: u64,
    fragment_offset: Option<u64>,
    total_data_length: Option<u64>,
}

impl Default for PrimaryBlockBuilder {
    fn default() -> Self {
        PrimaryBlockBuilder {
            bundle_processing_flags: BundleFlags::empty(),
            crc: CRCType::NoCRC,
            destination_endpoint: None,
            source_node: Endpoint::Null,
            report_to: Endpoint::Null,
            creation_timestamp: None,
            lifetime: DEFAULT_LIFETIME,
            fragment_offset: None,
            total_data_length: None,
        }
    }
}

impl PrimaryBlockBuilder {
    pub fn new() -> Self {
        PrimaryBlockBuilder::default()
    }

    pub fn bundle_processing_flags(mut self, flags: BundleFlags) -> Self {
        self.bundle_processing_flags = flags;
        self
    }

    pub fn crc(mut self, crc: CRCType) -> Self {
        self.crc = crc;
        self
    }

    pub fn destination_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.destination_endpoint = Some(endpoint);
        self
    }

    pub fn source_node(mut self, endpoint: Endpoint) -> Self {
        self.source_node = endpoint;
        self
    }

    pub fn report_to(mut self, endpoint: Endpoint) -> Self {
        self.report_to = endpoint;
        self
    }

    pub fn creation_timestamp(mut self, timestamp: CreationTimestamp) -> Self {
        self.creation_timestamp = Some(timestamp);
        self
    }

    pub fn lifetime(mut self, lifetime: u64) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn fragment_offset(mut self, offset: u64) -> Self {
        self.fragment_offset = Some(offset);
        self
    }

    pub fn total_data_length(mut self, length: u64) -> Self {
        self.total_data_length = Some(length);
        self
    }

    pub fn build(self) -> Result<PrimaryBlock, BundleError> {
        let destination_endpoint = self
            .destination_endpoint
            .ok_or(BundleError::MissingDestination)?;
        Ok(PrimaryBlock {
            version: 7,
            bundle_processing_flags: self.bundle_processing_flags,
            crc: self.crc,
            destination_endpoint,
            source_node: self.source_node,
            report_to: self.report_to,
            creation_timestamp: self
                .creation_timestamp
                .unwrap_or_else(CreationTimestamp::now),
            lifetime: self.lifetime,
            fragment_offset: self.fragment_offset,
            total_data_length: self.total_data_length,
        })
    }
}
