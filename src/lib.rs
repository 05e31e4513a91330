//! auralis-demux: ISO-family container demuxing for auralis.
//!
//! This crate walks the nested box structure of MP4/M4A/MOV/3GP files,
//! extracts codec parameters and sample-location tables, and hands
//! compressed sample byte ranges to an external decoder. It is built for
//! untrusted input: truncated or corrupted structures are repaired or
//! rejected with bounded memory and stack usage, and a byte-range
//! streaming manager lets the parser operate correctly against files
//! that are still being downloaded.
//!
//! # Modules
//!
//! - `io` - the byte source abstraction (file, memory, shared handles)
//! - `iso` - box parser, sample tables, codec config, error recovery
//! - `streaming` - downloaded-range tracking and blocking waits
//!
//! # Architecture
//!
//! [`IsoDemuxer`] drives everything for one open stream:
//!
//! 1. The source is classified: movie box up front (fully indexed) or
//!    behind the media data (progressive download).
//! 2. The box parser walks the tree depth-bounded, building one
//!    [`AudioTrackInfo`] plus [`SampleTableInfo`] per audio track; the
//!    [`RecoveryContext`] repairs what it safely can along the way.
//! 3. Sample reads go straight to the source for local files, or through
//!    the [`StreamingManager`]'s confirmed-range set, blocking until the
//!    bytes arrive, for in-flight downloads.
//!
//! The demuxer never decodes audio; codec configuration bytes pass
//! through verbatim for the decoder to interpret.

pub mod error;
pub mod io;
pub mod iso;
pub mod streaming;

pub use error::{Error, Result};
pub use io::{ByteSource, FileSource, MemorySource, SharedSource};
pub use iso::{
    AudioCodec, AudioTrackInfo, BoxHeader, BoxParser, BoxType, IsoDemuxer, MediaChunk,
    RecoveryContext, SampleTableInfo,
};
pub use streaming::{ByteRange, StreamingManager};
