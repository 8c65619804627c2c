// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Frame codec.
//!
//! One frame on the wire is a fixed-size header followed by the body:
//!
//! ```text
//! +-----------------+---------+----------------------+------------------+
//! | tag (repr size) | padding | body length (u64)    | body (N bytes)   |
//! +-----------------+---------+----------------------+------------------+
//! ```
//!
//! Fields are laid out the way a C struct `{ tag; uint64_t size; }` would be:
//! the length sits at the next 8-byte boundary after the tag. All integers use
//! the byte order of the producing process, so both ends must agree on it out
//! of band.
//!
//! The body is a stack of fixed-layout values: [`Frame::append`] pushes onto
//! the end, [`Frame::extract`] pops from the end.

use std::fmt::{self, Debug, Display};

use bytes::{BufMut, BytesMut};

use crate::AppError::{self, Incomplete};
use crate::AppResult;

/// A value with a fixed, indirection-free byte layout.
///
/// Appending copies exactly `SIZE` bytes in native byte order; extracting reads
/// them back. Nothing checks that producer and consumer agree on the types.
pub trait Scalar: Copy {
    const SIZE: usize;

    fn put_ne(&self, dst: &mut BytesMut);

    /// `src` holds at least `SIZE` bytes.
    fn from_ne_slice(src: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put_ne(&self, dst: &mut BytesMut) {
                    dst.put_slice(&self.to_ne_bytes());
                }

                fn from_ne_slice(src: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&src[..Self::SIZE]);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl Scalar for bool {
    const SIZE: usize = 1;

    fn put_ne(&self, dst: &mut BytesMut) {
        dst.put_u8(u8::from(*self));
    }

    fn from_ne_slice(src: &[u8]) -> Self {
        src[0] != 0
    }
}

impl<T: Scalar, const N: usize> Scalar for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn put_ne(&self, dst: &mut BytesMut) {
        for item in self {
            item.put_ne(dst);
        }
    }

    fn from_ne_slice(src: &[u8]) -> Self {
        std::array::from_fn(|i| T::from_ne_slice(&src[i * T::SIZE..]))
    }
}

/// Application-chosen message discriminant carried in every header.
///
/// `Repr` fixes the width on the wire. A header whose tag does not map back
/// through `from_repr` is a malformed stream.
pub trait FrameTag: Copy + Debug + Send + Sync + 'static {
    type Repr: Scalar + Into<u64>;

    fn to_repr(self) -> Self::Repr;

    fn from_repr(repr: Self::Repr) -> Option<Self>;
}

macro_rules! impl_integer_tag {
    ($($ty:ty),*) => {
        $(
            impl FrameTag for $ty {
                type Repr = $ty;

                fn to_repr(self) -> $ty {
                    self
                }

                fn from_repr(repr: $ty) -> Option<Self> {
                    Some(repr)
                }
            }
        )*
    };
}

impl_integer_tag!(u8, u16, u32, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader<T> {
    pub tag: T,
    pub body_length: u64,
}

impl<T: FrameTag> FrameHeader<T> {
    const LENGTH_OFFSET: usize = (T::Repr::SIZE + 7) / 8 * 8;
    pub const SIZE: usize = Self::LENGTH_OFFSET + 8;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(Self::SIZE);
        self.tag.to_repr().put_ne(dst);
        dst.put_bytes(0, Self::LENGTH_OFFSET - T::Repr::SIZE);
        self.body_length.put_ne(dst);
    }

    /// Parses a header from the front of `src` without consuming it.
    pub fn parse(src: &[u8]) -> AppResult<FrameHeader<T>> {
        if src.len() < Self::SIZE {
            return Err(Incomplete);
        }
        let repr = T::Repr::from_ne_slice(src);
        let tag = T::from_repr(repr).ok_or_else(|| AppError::UnknownTag(repr.into()))?;
        let body_length = u64::from_ne_slice(&src[Self::LENGTH_OFFSET..]);
        Ok(FrameHeader { tag, body_length })
    }
}

/// One protocol unit: a tag plus an opaque body.
///
/// The header's body length is always derived from the body, so the two can
/// never disagree.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame<T> {
    tag: T,
    body: BytesMut,
}

impl<T: FrameTag> Frame<T> {
    pub fn new(tag: T) -> Self {
        Frame {
            tag,
            body: BytesMut::new(),
        }
    }

    pub fn with_body(tag: T, body: impl Into<BytesMut>) -> Self {
        Frame {
            tag,
            body: body.into(),
        }
    }

    pub fn tag(&self) -> T {
        self.tag
    }

    pub fn set_tag(&mut self, tag: T) {
        self.tag = tag;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_len(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn header(&self) -> FrameHeader<T> {
        FrameHeader {
            tag: self.tag,
            body_length: self.body_len(),
        }
    }

    /// Pushes `value`'s raw bytes onto the end of the body.
    pub fn append<V: Scalar>(&mut self, value: V) -> &mut Self {
        self.body.reserve(V::SIZE);
        value.put_ne(&mut self.body);
        self
    }

    /// Pops the last `V::SIZE` bytes off the body.
    ///
    /// Values come back in the reverse of their append order. If the body is
    /// shorter than `V::SIZE` nothing is removed and `Underflow` is returned.
    pub fn extract<V: Scalar>(&mut self) -> AppResult<V> {
        let available = self.body.len();
        if available < V::SIZE {
            return Err(AppError::Underflow {
                requested: V::SIZE,
                available,
            });
        }
        let start = available - V::SIZE;
        let value = V::from_ne_slice(&self.body[start..]);
        self.body.truncate(start);
        Ok(value)
    }

    /// Replaces the whole body with the bytes of `text`.
    pub fn set_text(&mut self, text: &str) {
        self.body.clear();
        self.body.extend_from_slice(text.as_bytes());
    }

    /// Reads the whole body as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Header followed by body, ready for the wire.
    pub fn encode(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(FrameHeader::<T>::SIZE + self.body.len());
        self.header().encode(&mut dst);
        dst.extend_from_slice(&self.body);
        dst
    }
}

impl<T: Debug> Debug for Frame<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("tag", &self.tag)
            .field("body_length", &self.body.len())
            .finish()
    }
}

impl<T: Debug> Display for Frame<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({} bytes)", self.tag, self.body.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState<T> {
    AwaitingHeader,
    AwaitingBody(FrameHeader<T>),
}

/// Incremental frame reader over a growing byte buffer.
///
/// Feed it whatever the socket produced; it consumes complete headers and
/// bodies and leaves partial ones in the buffer for the next call.
#[derive(Debug)]
pub struct FrameDecoder<T> {
    state: ReadState<T>,
    max_body_length: u64,
}

impl<T: FrameTag> FrameDecoder<T> {
    pub fn new(max_body_length: u64) -> Self {
        FrameDecoder {
            state: ReadState::AwaitingHeader,
            max_body_length,
        }
    }

    pub fn state(&self) -> ReadState<T> {
        self.state
    }

    /// Returns the next complete frame, or `None` when more bytes are needed.
    ///
    /// An oversized or unknown header is an error; the stream cannot be
    /// resynchronised after it.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> AppResult<Option<Frame<T>>> {
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    let header = match FrameHeader::<T>::parse(buffer) {
                        Ok(header) => header,
                        Err(Incomplete) => {
                            buffer.reserve(FrameHeader::<T>::SIZE);
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                    if header.body_length > self.max_body_length {
                        return Err(AppError::FrameTooLarge {
                            size: header.body_length,
                            max: self.max_body_length,
                        });
                    }
                    let _ = buffer.split_to(FrameHeader::<T>::SIZE);
                    if header.body_length == 0 {
                        return Ok(Some(Frame::new(header.tag)));
                    }
                    self.state = ReadState::AwaitingBody(header);
                }
                ReadState::AwaitingBody(header) => {
                    // bounded by max_body_length above
                    let body_length = header.body_length as usize;
                    if buffer.len() < body_length {
                        buffer.reserve(body_length - buffer.len());
                        return Ok(None);
                    }
                    let body = buffer.split_to(body_length);
                    self.state = ReadState::AwaitingHeader;
                    return Ok(Some(Frame::with_body(header.tag, body)));
                }
            }
        }
    }
}
