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

use std::fmt::Display;

use serde::{
    Deserialize, Serialize,
    de::{Error, Unexpected, Visitor},
    ser::SerializeSeq,
};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

use crate::{Validate, bundle::BundleError};

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq)]
#[repr(u64)]
enum EndpointType {
    Dtn = 1,
    Ipn = 2,
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum EndpointError {
    #[error("an endpoint uri needs a scheme followed by ':'")]
    SchemeMissing,
    #[error("the scheme-specific part is not valid for this scheme")]
    InvalidSSP,
    #[error("could not parse '{0}' as a number")]
    CouldNotParseNumber(String),
}

/// An endpoint id in one of the two RFC 9171 uri schemes, or the
/// distinguished null endpoint `dtn:none`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub enum Endpoint {
    DTN(DTNEndpoint),
    IPN(IPNEndpoint),
    Null,
}

impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        match self {
            Endpoint::DTN(e) => {
                seq.serialize_element(&EndpointType::Dtn)?;
                seq.serialize_element(e)?;
            }
            Endpoint::IPN(e) => {
                seq.serialize_element(&EndpointType::Ipn)?;
                seq.serialize_element(e)?;
            }
            // the null endpoint is dtn scheme with the ssp replaced by 0
            Endpoint::Null => {
                seq.serialize_element(&EndpointType::Dtn)?;
                seq.serialize_element(&0_u64)?;
            }
        }
        seq.end()
    }
}

/// Scheme-specific part of a dtn endpoint as it appears on the wire.
/// `0` and the empty text string both mean the null endpoint; the text
/// `"none"` is not a valid wire form.
enum DtnSsp {
    Null,
    Uri(String),
}

impl<'de> Deserialize<'de> for DtnSsp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DtnSspVisitor;
        impl Visitor<'_> for DtnSspVisitor {
            type Value = DtnSsp;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("dtn endpoint scheme-specific part")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v == 0 {
                    return Ok(DtnSsp::Null);
                }
                Err(Error::invalid_value(
                    Unexpected::Unsigned(v),
                    &"dtn endpoints may only have 0 as a numeric ssp",
                ))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v.is_empty() {
                    return Ok(DtnSsp::Null);
                }
                if v == "none" {
                    return Err(Error::invalid_value(
                        Unexpected::Str(v),
                        &"the null endpoint is encoded as 0, not as text",
                    ));
                }
                Ok(DtnSsp::Uri(String::from(v)))
            }
        }
        deserializer.deserialize_any(DtnSspVisitor)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EndpointVisitor;
        impl<'de> Visitor<'de> for EndpointVisitor {
            type Value = Endpoint;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("endpoint")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let endpoint_type: EndpointType = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'endpoint_type'"))?;
                match endpoint_type {
                    EndpointType::Dtn => {
                        let ssp: DtnSsp = seq
                            .next_element()?
                            .ok_or(Error::custom("Error for field 'dtn_endpoint'"))?;
                        Ok(match ssp {
                            DtnSsp::Null => Endpoint::Null,
                            DtnSsp::Uri(uri) => Endpoint::DTN(DTNEndpoint { uri }),
                        })
                    }
                    EndpointType::Ipn => {
                        let ipn_endpoint: IPNEndpoint = seq
                            .next_element()?
                            .ok_or(Error::custom("Error for field 'ipn_endpoint'"))?;
                        Ok(Endpoint::IPN(ipn_endpoint))
                    }
                }
            }
        }
        deserializer.deserialize_seq(EndpointVisitor)
    }
}

impl Validate for Endpoint {
    fn validate(&self) -> Result<(), BundleError> {
        match self {
            Endpoint::DTN(e) => e.validate(),
            Endpoint::IPN(e) => e.validate(),
            Endpoint::Null => Ok(()),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::DTN(e) => e.fmt(f),
            Endpoint::IPN(e) => e.fmt(f),
            Endpoint::Null => f.write_str("dtn:none"),
        }
    }
}

impl Endpoint {
    pub fn new(uri: &str) -> Result<Self, EndpointError> {
        let (schema, content) = uri.split_once(':').ok_or(EndpointError::SchemeMissing)?;
        match schema {
            "dtn" => {
                if content.is_empty() || content == "none" {
                    return Ok(Endpoint::Null);
                }
                // the authority form carries the same hierarchy as the
                // bare form, the wire only ever sees the bare part
                let hier = content.strip_prefix("//").unwrap_or(content);
                if hier.is_empty() {
                    return Err(EndpointError::InvalidSSP);
                }
                Ok(Endpoint::DTN(DTNEndpoint {
                    uri: String::from(hier),
                }))
            }
            "ipn" => Ok(Endpoint::IPN(IPNEndpoint::from_str(content)?)),
            _ => Err(EndpointError::InvalidSSP),
        }
    }

    pub fn is_null_endpoint(&self) -> bool {
        matches!(self, Endpoint::Null)
    }

    pub fn matches_node(&self, other: &Endpoint) -> bool {
        match self {
            Endpoint::DTN(s) => matches!(other, Endpoint::DTN(o) if s.matches_node(o)),
            Endpoint::IPN(s) => matches!(other, Endpoint::IPN(o) if s.matches_node(o)),
            Endpoint::Null => matches!(other, Endpoint::Null),
        }
    }

    pub fn get_node_endpoint(&self) -> Endpoint {
        match self {
            Endpoint::DTN(s) => Endpoint::DTN(s.get_node_endpoint()),
            Endpoint::IPN(s) => Endpoint::IPN(s.get_node_endpoint()),
            Endpoint::Null => Endpoint::Null,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct DTNEndpoint {
    pub uri: String,
}

impl DTNEndpoint {
    pub fn node_name(&self) -> &str {
        // decoded uris from other implementations may still carry the
        // authority prefix
        let hier = self.uri.strip_prefix("//").unwrap_or(&self.uri);
        hier.split('/')
            .next()
            .expect("There is always a first element")
    }

    pub fn matches_node(&self, other: &DTNEndpoint) -> bool {
        self.node_name() == other.node_name()
    }

    pub fn get_node_endpoint(&self) -> DTNEndpoint {
        DTNEndpoint {
            uri: String::from(self.node_name()),
        }
    }
}

impl Serialize for DTNEndpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.uri)
    }
}

impl Validate for DTNEndpoint {
    fn validate(&self) -> Result<(), BundleError> {
        if self.uri.is_empty() {
            return Err(BundleError::InvalidEndpoint);
        }
        Ok(())
    }
}

impl Display for DTNEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.uri.starts_with("//") || self.uri.contains('/') {
            f.write_fmt(format_args!("dtn:{}", self.uri))
        } else {
            // a bare node name is rendered in authority form
            f.write_fmt(format_args!("dtn://{}/", self.uri))
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Clone, Copy, Hash)]
pub struct IPNEndpoint {
    pub node: u64,
    pub service: u64,
}

impl Validate for IPNEndpoint {
    fn validate(&self) -> Result<(), BundleError> {
        Ok(())
    }
}

impl IPNEndpoint {
    fn from_str(hier: &str) -> Result<Self, EndpointError> {
        let (node, service) = hier.split_once('.').ok_or(EndpointError::InvalidSSP)?;
        let node_id = node
            .parse()
            .map_err(|_| EndpointError::CouldNotParseNumber(String::from(node)))?;
        let service_id = service
            .parse()
            .map_err(|_| EndpointError::CouldNotParseNumber(String::from(service)))?;
        Ok(IPNEndpoint {
            node: node_id,
            service: service_id,
        })
    }

    pub fn matches_node(&self, other: &IPNEndpoint) -> bool {
        self.node == other.node
    }

    pub fn get_node_endpoint(&self) -> IPNEndpoint {
        IPNEndpoint {
            node: self.node,
            service: 0,
        }
    }
}

impl Display for IPNEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ipn:{}.{}", self.node, self.service))
    }
}
