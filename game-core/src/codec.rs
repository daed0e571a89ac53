//! The byte codec contract for game state.
//!
//! State images are fixed size, little-endian and written field by field at
//! documented offsets; the image is the on-the-wire representation between
//! the state store and the engines, so the layout must never depend on the
//! compiler. Implementations use [`bytes::BufMut`]/[`bytes::Buf`] directly;
//! there is no derive-based blitting.

use crate::error::CodecError;
use bytes::Bytes;

/// A stable byte codec for one game's state.
pub trait StateCodec {
    type State;

    /// The exact encoded size. Every image is this long, always.
    const ENCODED_LEN: usize;

    fn encode(state: &Self::State) -> Bytes;

    /// Decodes an image, verifying length and field ranges.
    fn decode(raw: &[u8]) -> Result<Self::State, CodecError>;

    /// Length guard shared by implementations.
    fn check_len(raw: &[u8]) -> Result<(), CodecError> {
        if raw.len() != Self::ENCODED_LEN {
            return Err(CodecError::Length {
                want: Self::ENCODED_LEN,
                got: raw.len(),
            });
        }
        Ok(())
    }
}
