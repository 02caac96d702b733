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

pub mod administrative_record;
pub mod block;
pub mod blockflags;
pub mod bundle;
pub mod bundleflags;
pub mod crc;
pub mod endpoint;
pub mod primaryblock;
pub mod security;
pub mod time;

use thiserror::Error;

use crate::bundle::BundleError;

/// Structural and semantic checks that can not be expressed in the type
/// system. Codecs accept anything that parses; `validate` decides whether
/// the result is a well-formed bundle entity.
pub trait Validate {
    fn validate(&self) -> Result<(), BundleError>;
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("CBOR (de)serialization failed: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("could not convert into the requested representation")]
    ConversionError,
}
