//! # Tarsum - Incremental Content Digests for Tar Streams
//!
//! `tarsum` computes a stable, content-addressed digest over a tar archive
//! as it streams by, without buffering the archive. The digest covers each
//! entry's body bytes plus a canonical selection of its header fields, and
//! the per-entry sums are aggregated in an order-independent way so that
//! archives carrying the same content under different entry orderings hash
//! identically. Key features:
//!
//! - **Incremental**: feed bytes in chunks of any size via [`TarSum::update`]
//!   or the [`std::io::Write`] impl
//! - **Resumable**: snapshot a session mid-stream with [`TarSum::checkpoint`]
//!   and pick it up later with [`TarSum::restore`], even in another process
//! - **Versioned**: digest policy [`Version::V0`] and [`Version::V1`] differ
//!   in which header fields count (V1 drops mtime and adds extended
//!   attributes)
//! - **Build-cache ready**: [`BuildCache`] keys build steps by parent image
//!   and instruction texts, which embed these digests
//!
//! ## Quick Start
//!
//! ```rust
//! use tarsum::{Result, TarSum, Version};
//!
//! # fn main() -> Result<()> {
//! let mut digest = TarSum::new(Version::V1);
//!
//! // An empty archive is just the two-block terminator.
//! digest.update(&[0u8; 1024])?;
//! digest.finish()?;
//!
//! assert_eq!(
//!     digest.sum_string(&[]),
//!     "tarsum.v1+sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Resuming a Session
//!
//! ```rust
//! use tarsum::{Result, TarSum, Version};
//!
//! # fn main() -> Result<()> {
//! let mut digest = TarSum::new(Version::V1);
//! digest.update(&[0u8; 512])?;
//!
//! // Serialize mid-archive, e.g. across a network hiccup.
//! let blob = digest.checkpoint()?;
//!
//! let mut resumed = TarSum::new(Version::V1);
//! resumed.restore(&blob)?;
//! resumed.update(&[0u8; 512])?;
//! resumed.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checkpoint;
pub mod digest;
pub mod error;
pub mod hash;
pub mod header;
pub mod sums;
pub mod version;

pub use crate::cache::BuildCache;
pub use crate::digest::{Stage, TarSum};
pub use crate::error::{CacheError, DigestError, Result, TarSumError};
pub use crate::hash::{HashState, ResumableSha256};
pub use crate::header::{TarHeader, BLOCK_SIZE};
pub use crate::sums::EntrySum;
pub use crate::version::Version;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Digest a tar archive file in one call and return its sum string.
pub fn sum_file(path: impl AsRef<Path>, version: Version) -> std::result::Result<String, TarSumError> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let mut digest = TarSum::new(version);
    let mut buf = [0u8; COPY_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n])?;
    }
    digest.finish()?;
    let sum = digest.sum_string(&[]);
    debug!(path = %path.display(), sum = %sum, "file digested");
    Ok(sum)
}
