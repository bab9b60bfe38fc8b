// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length-prefixed JSON framing.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{RequestFrame, ResponseFrame};
use crate::error::SyncError;

/// Codec turning 4-byte big-endian length-prefixed frames into JSON values.
///
/// Decodes `In` and encodes `Out`, so the same type serves both ends of a
/// connection with the parameters swapped.
#[derive(Debug)]
pub struct JsonFrameCodec<In, Out> {
    length_codec: LengthDelimitedCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Codec of the calling side.
pub type ClientCodec = JsonFrameCodec<ResponseFrame, RequestFrame>;

/// Codec of the serving side.
pub type ServerCodec = JsonFrameCodec<RequestFrame, ResponseFrame>;

impl<In, Out> JsonFrameCodec<In, Out> {
    /// Creates a codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            length_codec: LengthDelimitedCodec::new(),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Default for JsonFrameCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for JsonFrameCodec<In, Out> {
    type Item = In;
    type Error = SyncError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.length_codec.decode(src)? else {
            return Ok(None);
        };

        Ok(Some(serde_json::from_slice(&frame)?))
    }
}

impl<In, Out: Serialize> Encoder<Out> for JsonFrameCodec<In, Out> {
    type Error = SyncError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        Ok(self.length_codec.encode(Bytes::from(json), dst)?)
    }
}
