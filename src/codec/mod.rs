//! Decoders for the two compressed payloads of a frame body.

mod depth;
mod rgb;

pub use depth::DepthDecompressor;
pub use rgb::RgbDecoder;
