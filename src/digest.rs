//! Write-driven tar content digest sessions.
//!
//! A [`TarSum`] consumes raw archive bytes in arbitrarily sized chunks and
//! never requires a full archive in memory. Internally it runs an explicit
//! state machine: accumulate bytes until an entry header can be decoded,
//! stream the entry body into a per-entry hash, discard block padding,
//! repeat until the two-zero-block terminator. Completed per-entry digests
//! are combined order-independently into one aggregate digest.

use crate::error::{DigestError, Result};
use crate::hash::ResumableSha256;
use crate::header::{self, HeaderOutcome, TarHeader};
use crate::sums::{aggregate_order, EntrySum};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io;
use tracing::{debug, trace};

/// Processing stage of a digest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Accumulating bytes until an entry header (or the terminator) decodes
    AwaitingHeader,
    /// Streaming the current entry's body into its hash
    ReadingEntryBody,
    /// Discarding padding up to the next block boundary
    SkippingPadding,
    /// Terminal: terminator seen or a fatal error recorded
    Finished,
}

impl Stage {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Stage::AwaitingHeader => "awaiting header",
            Stage::ReadingEntryBody => "reading entry body",
            Stage::SkippingPadding => "skipping padding",
            Stage::Finished => "finished",
        }
    }
}

/// Incremental, resumable, order-independent content digest over a tar
/// stream.
///
/// Feed bytes with [`update`](TarSum::update) (or through the
/// [`io::Write`] impl), then read the aggregate with
/// [`sum_string`](TarSum::sum_string) or the checked
/// [`digest`](TarSum::digest). A session is single-owner: concurrent writers
/// must be prevented by the caller, the same discipline as any incremental
/// hash API.
pub struct TarSum {
    version: Version,
    stage: Stage,
    /// Unconsumed input: header-chain bytes while awaiting a header,
    /// body/padding bytes otherwise
    buf: Vec<u8>,
    entry_hash: ResumableSha256,
    entry_name: String,
    /// Body bytes of the current entry not yet digested
    entry_remaining: u64,
    /// Padding bytes still to discard after the current entry body
    pad: u64,
    file_counter: u64,
    bytes_written: u64,
    sums: Vec<EntrySum>,
    err: Option<DigestError>,
}

impl TarSum {
    /// Create a fresh session bound to a canonicalization policy.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            stage: Stage::AwaitingHeader,
            buf: Vec::new(),
            entry_hash: ResumableSha256::new(),
            entry_name: String::new(),
            entry_remaining: 0,
            pad: 0,
            file_counter: 0,
            bytes_written: 0,
            sums: Vec::new(),
            err: None,
        }
    }

    /// Return the session to its initial state, keeping the policy version.
    pub fn reset(&mut self) {
        *self = Self::new(self.version);
    }

    /// Absorb a chunk of raw archive bytes.
    ///
    /// Always accepts the full chunk. After the session reaches
    /// [`Stage::Finished`] (terminator seen or error recorded), further
    /// bytes are absorbed silently with no digest mutation, per the
    /// streaming-consumer contract. The first fatal fault is returned once
    /// and retained as the session's terminal error.
    pub fn update(&mut self, chunk: &[u8]) -> Result<usize> {
        self.bytes_written += chunk.len() as u64;
        if self.stage == Stage::Finished {
            return Ok(chunk.len());
        }

        self.buf.extend_from_slice(chunk);
        trace!(
            bytes = chunk.len(),
            total = self.bytes_written,
            stage = self.stage.as_str(),
            "absorbing input"
        );

        if let Err(err) = self.advance() {
            debug!(stage = self.stage.as_str(), error = %err, "fatal digest fault");
            self.err = Some(err.clone());
            self.stage = Stage::Finished;
            self.buf.clear();
            return Err(err);
        }
        Ok(chunk.len())
    }

    /// Run stage handlers until no further progress can be made with the
    /// buffered bytes.
    fn advance(&mut self) -> Result<()> {
        loop {
            let progressed = match self.stage {
                Stage::AwaitingHeader => self.step_header()?,
                Stage::ReadingEntryBody => self.step_body(),
                Stage::SkippingPadding => self.step_padding(),
                Stage::Finished => false,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn step_header(&mut self) -> Result<bool> {
        match header::decode_next(&self.buf) {
            Ok(HeaderOutcome::NeedMoreBytes) => Ok(false),
            Ok(HeaderOutcome::EndOfArchive) => {
                debug!(
                    entries = self.sums.len(),
                    bytes = self.bytes_written,
                    "archive terminator reached"
                );
                self.buf.clear();
                self.stage = Stage::Finished;
                Ok(false)
            }
            Ok(HeaderOutcome::Complete { header, consumed }) => {
                self.begin_entry(&header);
                self.buf.drain(..consumed);
                self.stage = Stage::ReadingEntryBody;
                Ok(true)
            }
            Err(fault) => Err(DigestError::MalformedArchive {
                stage: self.stage.as_str(),
                offset: self.bytes_written,
                reason: fault.to_string(),
            }),
        }
    }

    fn begin_entry(&mut self, header: &TarHeader) {
        // The digest canonicalizes the raw header name; normalization only
        // affects the name recorded for aggregation.
        self.entry_name = normalize_name(&header.name);
        for (field, value) in self.version.select_headers(header) {
            self.entry_hash.update(field.as_bytes());
            self.entry_hash.update(&value);
        }
        self.entry_remaining = header.size as u64;
        self.pad = header::block_padding(self.entry_remaining);
        trace!(
            name = %self.entry_name,
            size = self.entry_remaining,
            pad = self.pad,
            "entry header decoded"
        );
    }

    fn step_body(&mut self) -> bool {
        let take = self.entry_remaining.min(self.buf.len() as u64) as usize;
        if take > 0 {
            self.entry_hash.update(&self.buf[..take]);
            self.buf.drain(..take);
            self.entry_remaining -= take as u64;
        }
        if self.entry_remaining > 0 {
            return false;
        }
        self.stage = Stage::SkippingPadding;
        true
    }

    fn step_padding(&mut self) -> bool {
        let take = self.pad.min(self.buf.len() as u64) as usize;
        if take > 0 {
            self.buf.drain(..take);
            self.pad -= take as u64;
        }
        if self.pad > 0 {
            return false;
        }

        let sum = hex_string(&self.entry_hash.sum(&[]));
        trace!(name = %self.entry_name, sum = %sum, pos = self.file_counter, "entry complete");
        self.sums.push(EntrySum {
            name: std::mem::take(&mut self.entry_name),
            sum,
            pos: self.file_counter,
        });
        self.file_counter += 1;
        self.entry_hash.reset();
        self.stage = Stage::AwaitingHeader;
        true
    }

    /// Declare true end-of-input.
    ///
    /// An error unless the terminator has already been seen: a stream that
    /// ends mid-archive is truncated, and any digest from it is invalid.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if self.stage == Stage::Finished {
            return Ok(());
        }
        let err = DigestError::TruncatedArchive {
            stage: self.stage.as_str(),
            offset: self.bytes_written,
        };
        self.err = Some(err.clone());
        self.stage = Stage::Finished;
        self.buf.clear();
        Err(err)
    }

    /// Aggregate digest over all completed entries.
    ///
    /// Entries combine in digest order (archive order for repeated names),
    /// making the result invariant under reordering of unrelated entries.
    /// `extra` bytes, if any, are hashed first. Idempotent and read-only.
    pub fn sum(&self, extra: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        if !extra.is_empty() {
            hasher.update(extra);
        }
        for entry in aggregate_order(&self.sums) {
            hasher.update(entry.sum.as_bytes());
        }
        hasher.finalize().into()
    }

    /// Self-describing digest label: policy version plus hash algorithm.
    pub fn label(&self) -> String {
        format!("{}+sha256", self.version)
    }

    /// `"<label>:<hex aggregate>"`, e.g. `"tarsum.v1+sha256:6ffd43a15..."`.
    pub fn sum_string(&self, extra: &[u8]) -> String {
        format!("{}:{}", self.label(), hex_string(&self.sum(extra)))
    }

    /// Checked digest: errors unless the session finished without a fault.
    pub fn digest(&self, extra: &[u8]) -> Result<String> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if self.stage != Stage::Finished {
            return Err(DigestError::TruncatedArchive {
                stage: self.stage.as_str(),
                offset: self.bytes_written,
            });
        }
        Ok(self.sum_string(extra))
    }

    /// Policy version this session is bound to.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Current processing stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether the session reached its terminal stage.
    pub fn finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    /// Terminal error, if one was recorded.
    pub fn error(&self) -> Option<&DigestError> {
        self.err.as_ref()
    }

    /// Total bytes ever passed to this session.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Completed per-entry records in archive order.
    pub fn entries(&self) -> &[EntrySum] {
        &self.sums
    }

    // Checkpoint codec internals live in `checkpoint.rs`; these accessors
    // keep the session fields private to this module.
    pub(crate) fn parts(&self) -> SessionParts<'_> {
        SessionParts {
            version: self.version,
            stage: self.stage,
            buf: &self.buf,
            entry_hash: &self.entry_hash,
            entry_name: &self.entry_name,
            entry_remaining: self.entry_remaining,
            pad: self.pad,
            file_counter: self.file_counter,
            bytes_written: self.bytes_written,
            sums: &self.sums,
            err: self.err.as_ref(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        version: Version,
        stage: Stage,
        buf: Vec<u8>,
        entry_hash: ResumableSha256,
        entry_name: String,
        entry_remaining: u64,
        pad: u64,
        file_counter: u64,
        bytes_written: u64,
        sums: Vec<EntrySum>,
    ) -> Self {
        Self {
            version,
            stage,
            buf,
            entry_hash,
            entry_name,
            entry_remaining,
            pad,
            file_counter,
            bytes_written,
            sums,
            err: None,
        }
    }
}

pub(crate) struct SessionParts<'a> {
    pub version: Version,
    pub stage: Stage,
    pub buf: &'a [u8],
    pub entry_hash: &'a ResumableSha256,
    pub entry_name: &'a str,
    pub entry_remaining: u64,
    pub pad: u64,
    pub file_counter: u64,
    pub bytes_written: u64,
    pub sums: &'a [EntrySum],
    pub err: Option<&'a DigestError>,
}

impl io::Write for TarSum {
    fn write(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.update(chunk)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Strip one leading `./` and one trailing `/` so directory entries and
/// root-relative entries aggregate under the same name.
fn normalize_name(name: &str) -> String {
    let name = name.strip_prefix("./").unwrap_or(name);
    let name = name.strip_suffix('/').unwrap_or(name);
    name.to_owned()
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_empty_archive_is_empty_hash() {
        let mut session = TarSum::new(Version::V1);
        assert_eq!(session.update(&[0u8; 1024]).unwrap(), 1024);
        assert!(session.finished());
        assert!(session.error().is_none());
        assert_eq!(hex_string(&session.sum(&[])), EMPTY_SHA256);
    }

    #[test]
    fn test_fresh_session_sums_to_empty_hash() {
        let session = TarSum::new(Version::V1);
        assert_eq!(hex_string(&session.sum(&[])), EMPTY_SHA256);
    }

    #[test]
    fn test_labels() {
        assert_eq!(TarSum::new(Version::V0).label(), "tarsum+sha256");
        assert_eq!(TarSum::new(Version::V1).label(), "tarsum.v1+sha256");
    }

    #[test]
    fn test_writes_after_finish_are_absorbed() {
        let mut session = TarSum::new(Version::V1);
        session.update(&[0u8; 1024]).unwrap();
        let digest = session.sum_string(&[]);

        assert_eq!(session.update(b"trailing garbage").unwrap(), 16);
        assert_eq!(session.sum_string(&[]), digest);
        assert_eq!(session.bytes_written(), 1040);
    }

    #[test]
    fn test_digest_requires_finished() {
        let session = TarSum::new(Version::V0);
        assert!(matches!(
            session.digest(&[]),
            Err(DigestError::TruncatedArchive { .. })
        ));
    }

    #[test]
    fn test_finish_on_partial_stream_is_truncated() {
        let mut session = TarSum::new(Version::V1);
        session.update(&[0u8; 512]).unwrap();
        let err = session.finish().unwrap_err();
        assert!(matches!(err, DigestError::TruncatedArchive { offset: 512, .. }));
        assert!(session.finished());
        assert_eq!(session.error(), Some(&err));
    }

    #[test]
    fn test_malformed_header_is_terminal() {
        let mut bad = [0u8; 2048];
        bad[0] = b'x'; // nonzero block with an invalid checksum
        let mut session = TarSum::new(Version::V1);
        let err = session.update(&bad).unwrap_err();
        assert!(matches!(err, DigestError::MalformedArchive { .. }));
        assert!(session.finished());

        // Later writes are absorbed silently; the error is retained.
        assert_eq!(session.update(&[0u8; 1024]).unwrap(), 1024);
        assert_eq!(session.error(), Some(&err));
        assert!(session.digest(&[]).is_err());
    }

    #[test]
    fn test_reset_clears_terminal_error() {
        let mut session = TarSum::new(Version::V1);
        let _ = session.update(&[1u8; 2048]);
        assert!(session.error().is_some());

        session.reset();
        assert!(session.error().is_none());
        assert_eq!(session.bytes_written(), 0);
        session.update(&[0u8; 1024]).unwrap();
        assert_eq!(hex_string(&session.sum(&[])), EMPTY_SHA256);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("./foo/"), "foo");
        assert_eq!(normalize_name("foo/bar"), "foo/bar");
        assert_eq!(normalize_name("dir/"), "dir");
        assert_eq!(normalize_name("./"), "");
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x00, 0xff, 0x1a]), "00ff1a");
    }
}
