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
    ser::SerializeSeq,
};

use crate::{SerializationError, administrative_record::bundle_status_report::BundleStatusReport};

pub mod bundle_status_report;

const BUNDLE_STATUS_REPORT_TYPE: u64 = 1;

/// The payload of an administrative-record bundle: `[record_type, body]`.
/// Record types other than the bundle status report are carried opaquely.
#[derive(Debug, PartialEq, Eq)]
pub enum AdministrativeRecord {
    BundleStatusReport(BundleStatusReport),
    Unkown(u64, Vec<u8>),
}

struct RecordBytes<'a>(&'a [u8]);

impl Serialize for RecordBytes<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for AdministrativeRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        match self {
            AdministrativeRecord::BundleStatusReport(e) => {
                seq.serialize_element(&BUNDLE_STATUS_REPORT_TYPE)?;
                seq.serialize_element(e)?;
            }
            AdministrativeRecord::Unkown(record_type, data) => {
                seq.serialize_element(record_type)?;
                seq.serialize_element(&RecordBytes(data))?;
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for AdministrativeRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AdministrativeRecordVisitor;
        impl<'de> Visitor<'de> for AdministrativeRecordVisitor {
            type Value = AdministrativeRecord;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("administrative record")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let record_type: u64 = seq.next_element()?.ok_or(Error::custom(
                    "Error for field 'administrative_record_type'",
                ))?;
                if record_type == BUNDLE_STATUS_REPORT_TYPE {
                    let bundle_status_report: BundleStatusReport = seq
                        .next_element()?
                        .ok_or(Error::custom("Error for field 'bundle_status_report'"))?;
                    Ok(AdministrativeRecord::BundleStatusReport(
                        bundle_status_report,
                    ))
                } else {
                    let data: &[u8] = seq
                        .next_element()?
                        .ok_or(Error::custom("Error for field 'record_content'"))?;
                    Ok(AdministrativeRecord::Unkown(record_type, Vec::from(data)))
                }
            }
        }
        deserializer.deserialize_seq(AdministrativeRecordVisitor)
    }
}

impl TryFrom<Vec<u8>> for AdministrativeRecord {
    type Error = SerializationError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        serde_cbor::from_slice(&value).map_err(SerializationError::Cbor)
    }
}

impl TryFrom<&Vec<u8>> for AdministrativeRecord {
    type Error = SerializationError;

    fn try_from(value: &Vec<u8>) -> Result<Self, Self::Error> {
        serde_cbor::from_slice(value).map_err(SerializationError::Cbor)
    }
}

impl TryFrom<AdministrativeRecord> for Vec<u8> {
    type Error = SerializationError;

    fn try_from(value: AdministrativeRecord) -> Result<Self, Self::Error> {
        (&value).try_into()
    }
}

impl TryFrom<&AdministrativeRecord> for Vec<u8> {
    type Error = SerializationError;

    fn try_from(value: &AdministrativeRecord) -> Result<Self, Self::Error> {
        serde_cbor::to_vec(value).map_err(SerializationError::Cbor)
    }
}

#[cfg(test)]
mod tests {
    use crate::administrative_record::AdministrativeRecord;

    #[test]
    fn roundtrip_unkown_record() -> Result<(), crate::SerializationError> {
        let record = AdministrativeRecord::Unkown(17, vec![0xDE, 0xAD]);
        let data: Vec<u8> = (&record).try_into()?;
        assert_eq!(data, [0x82, 0x11, 0x42, 0xDE, 0xAD]);
        let recovered: AdministrativeRecord = data.try_into()?;
        assert_eq!(recovered, record);
        Ok(())
    }
}
