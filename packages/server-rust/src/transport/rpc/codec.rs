//! Length-delimited `MsgPack` framing for [`RpcFrame`]s.
//!
//! Each frame is a 4-byte big-endian length followed by the `MsgPack` map.
//! Frames longer than `max_frame_len` are rejected on both read and write.

use bytes::{Bytes, BytesMut};
use storefront_core::{FrameError, RpcFrame};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Errors reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Encodes and decodes whole [`RpcFrame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .big_endian()
                .max_frame_length(max_frame_len)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = RpcFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => Ok(Some(RpcFrame::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<RpcFrame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: RpcFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = frame.encode()?;
        self.inner.encode(Bytes::from(bytes), dst)?;
        Ok(())
    }
}
