//! Tree encoding and decoding.
//!
//! A snapshot is serialized as a stream of length-delimited file records and
//! packed into one or more chunks. A record is never split across a chunk
//! boundary, so every chunk re-parses on its own and the decoder simply
//! walks the chunk list in order.

mod codec;

pub use codec::TreeCodec;
