//! Transparent content decoding for response bodies.
//!
//! Decoding is stream composition: [`decode_entity`] takes an [`Entity`] (a byte
//! stream plus its known length) and returns another one. When the response's
//! `Content-Encoding` lists `gzip`, the stream is inflated incrementally as chunks
//! arrive and the known length is cleared, since the decompressed size cannot be
//! known in advance. Callers then account for size by counting bytes read.

use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures_util::stream::{self, Stream, StreamExt};

/// Boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A response body: its chunk stream and, when known, its length in bytes.
pub struct Entity {
    stream: ByteStream,
    content_length: Option<u64>,
}

impl Entity {
    /// Wraps a body stream with the length reported by the transport.
    pub fn new(stream: ByteStream, content_length: Option<u64>) -> Self {
        Self {
            stream,
            content_length,
        }
    }

    /// Length of the body as it will be read, when known in advance.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Consumes the entity, returning its chunk stream.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Returns true when a `Content-Encoding` value lists `gzip` among its codecs.
///
/// Codec names are compared case-insensitively; parameters after `;` are ignored.
#[must_use]
pub fn lists_gzip(content_encoding: Option<&str>) -> bool {
    content_encoding.is_some_and(|value| {
        value.split(',').any(|codec| {
            let name = codec.split(';').next().unwrap_or_default().trim();
            name.eq_ignore_ascii_case("gzip")
        })
    })
}

/// Undoes the transport-level content encoding of an entity.
///
/// Gzip-encoded entities are wrapped in an inflating stream whose length is unknown;
/// everything else passes through unchanged.
#[must_use]
pub fn decode_entity(entity: Entity, content_encoding: Option<&str>) -> Entity {
    if lists_gzip(content_encoding) {
        Entity::new(gunzip(entity.into_stream()), None)
    } else {
        entity
    }
}

struct Inflate {
    source: ByteStream,
    decoder: GzDecoder<Vec<u8>>,
    done: bool,
}

impl Inflate {
    fn drain(&mut self) -> Option<Bytes> {
        let out = std::mem::take(self.decoder.get_mut());
        (!out.is_empty()).then(|| Bytes::from(out))
    }
}

/// Inflates a gzip-compressed chunk stream as it is read.
#[must_use]
pub fn gunzip(source: ByteStream) -> ByteStream {
    let state = Inflate {
        source,
        decoder: GzDecoder::new(Vec::new()),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        while !state.done {
            match state.source.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = state.decoder.write_all(&chunk) {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                    if let Some(out) = state.drain() {
                        return Some((Ok(out), state));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    if let Err(e) = state.decoder.try_finish() {
                        return Some((Err(e), state));
                    }
                    if let Some(out) = state.drain() {
                        return Some((Ok(out), state));
                    }
                }
            }
        }
        None
    }))
}
