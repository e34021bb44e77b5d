//! Suspend/resume codec for digest sessions.
//!
//! A checkpoint is an opaque, self-versioned binary blob carrying everything
//! a session needs to continue bit-for-bit: policy version, hash algorithm
//! identifier, progress counters, completed entry records, and (for an
//! unfinished session) the stage, per-entry bookkeeping, raw unconsumed
//! buffer, and the exported internal state of the in-progress entry hash.

use crate::digest::{Stage, TarSum};
use crate::error::{DigestError, Result};
use crate::hash::{HashState, ResumableSha256};
use crate::sums::EntrySum;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAGIC: [u8; 4] = *b"TSCK";
const FORMAT_VERSION: u16 = 1;
const ALGORITHM: &str = "sha256";

#[derive(Serialize, Deserialize)]
struct CheckpointBlob {
    magic: [u8; 4],
    format: u16,
    /// Policy version label, e.g. "tarsum.v1"
    version: String,
    algorithm: String,
    finished: bool,
    bytes_written: u64,
    file_counter: u64,
    /// Present only for unfinished sessions
    resume: Option<ResumeState>,
    /// Completed entry records in archive order
    sums: Vec<EntrySum>,
}

#[derive(Serialize, Deserialize)]
struct ResumeState {
    stage: Stage,
    entry_name: String,
    entry_remaining: u64,
    pad: u64,
    buf: Vec<u8>,
    entry_hash: HashState,
}

impl TarSum {
    /// Serialize the full session state for later [`restore`](TarSum::restore).
    ///
    /// Errors if the session already failed: a checkpoint of a poisoned
    /// session could never resume to a valid digest.
    pub fn checkpoint(&self) -> Result<Vec<u8>> {
        let parts = self.parts();
        if let Some(err) = parts.err {
            return Err(err.clone());
        }

        let finished = parts.stage == Stage::Finished;
        let blob = CheckpointBlob {
            magic: MAGIC,
            format: FORMAT_VERSION,
            version: parts.version.to_string(),
            algorithm: ALGORITHM.to_owned(),
            finished,
            bytes_written: parts.bytes_written,
            file_counter: parts.file_counter,
            resume: (!finished).then(|| ResumeState {
                stage: parts.stage,
                entry_name: parts.entry_name.to_owned(),
                entry_remaining: parts.entry_remaining,
                pad: parts.pad,
                buf: parts.buf.to_vec(),
                entry_hash: parts.entry_hash.export_state(),
            }),
            sums: parts.sums.to_vec(),
        };

        let encoded = bincode::serialize(&blob)
            .map_err(|err| DigestError::CorruptState(format!("encoding failed: {}", err)))?;
        debug!(
            bytes = encoded.len(),
            entries = blob.sums.len(),
            finished,
            "session checkpointed"
        );
        Ok(encoded)
    }

    /// Replace this session with one reconstructed from a checkpoint blob.
    ///
    /// All-or-nothing: on any decode or validation failure the session is
    /// left untouched and [`DigestError::CorruptState`] is returned. The
    /// session adopts the checkpoint's policy version.
    pub fn restore(&mut self, blob: &[u8]) -> Result<()> {
        let decoded: CheckpointBlob = bincode::deserialize(blob)
            .map_err(|err| DigestError::CorruptState(format!("decoding failed: {}", err)))?;

        if decoded.magic != MAGIC {
            return Err(DigestError::CorruptState("bad magic".to_owned()));
        }
        if decoded.format != FORMAT_VERSION {
            return Err(DigestError::CorruptState(format!(
                "unknown checkpoint format {}",
                decoded.format
            )));
        }
        if decoded.algorithm != ALGORITHM {
            return Err(DigestError::CorruptState(format!(
                "unknown hash algorithm {:?}",
                decoded.algorithm
            )));
        }
        let version: Version = decoded
            .version
            .parse()
            .map_err(|_| DigestError::CorruptState(format!(
                "unknown policy version {:?}",
                decoded.version
            )))?;
        if decoded
            .sums
            .windows(2)
            .any(|pair| pair[0].pos >= pair[1].pos)
        {
            return Err(DigestError::CorruptState(
                "entry positions not strictly increasing".to_owned(),
            ));
        }

        let session = match (decoded.finished, decoded.resume) {
            (true, None) => TarSum::from_parts(
                version,
                Stage::Finished,
                Vec::new(),
                ResumableSha256::new(),
                String::new(),
                0,
                0,
                decoded.file_counter,
                decoded.bytes_written,
                decoded.sums,
            ),
            (false, Some(resume)) => {
                if resume.stage == Stage::Finished {
                    return Err(DigestError::CorruptState(
                        "finished stage inside resume state".to_owned(),
                    ));
                }
                let mut entry_hash = ResumableSha256::new();
                entry_hash.import_state(&resume.entry_hash)?;
                TarSum::from_parts(
                    version,
                    resume.stage,
                    resume.buf,
                    entry_hash,
                    resume.entry_name,
                    resume.entry_remaining,
                    resume.pad,
                    decoded.file_counter,
                    decoded.bytes_written,
                    decoded.sums,
                )
            }
            _ => {
                return Err(DigestError::CorruptState(
                    "finished flag inconsistent with resume state".to_owned(),
                ))
            }
        };

        debug!(
            version = %version,
            bytes = decoded.bytes_written,
            "session restored from checkpoint"
        );
        *self = session;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_round_trip() {
        let original = TarSum::new(Version::V1);
        let blob = original.checkpoint().unwrap();

        let mut restored = TarSum::new(Version::V0);
        restored.restore(&blob).unwrap();
        assert_eq!(restored.version(), Version::V1);
        assert_eq!(restored.bytes_written(), 0);
        assert!(!restored.finished());
    }

    #[test]
    fn test_finished_session_round_trip() {
        let mut original = TarSum::new(Version::V0);
        original.update(&[0u8; 1024]).unwrap();
        let blob = original.checkpoint().unwrap();

        let mut restored = TarSum::new(Version::V0);
        restored.restore(&blob).unwrap();
        assert!(restored.finished());
        assert_eq!(restored.sum_string(&[]), original.sum_string(&[]));
        assert_eq!(restored.bytes_written(), 1024);
    }

    #[test]
    fn test_errored_session_refuses_checkpoint() {
        let mut session = TarSum::new(Version::V1);
        let _ = session.update(&[1u8; 2048]);
        assert!(session.error().is_some());
        assert!(session.checkpoint().is_err());
    }

    #[test]
    fn test_restore_rejects_garbage_and_leaves_target_untouched() {
        let mut session = TarSum::new(Version::V1);
        session.update(&[0u8; 100]).unwrap();

        let err = session.restore(b"definitely not a checkpoint").unwrap_err();
        assert!(matches!(err, DigestError::CorruptState(_)));
        assert_eq!(session.bytes_written(), 100);
        assert_eq!(session.version(), Version::V1);

        // The untouched session still completes normally.
        session.update(&[0u8; 924]).unwrap();
        assert!(session.finished());
    }

    #[test]
    fn test_restore_rejects_bad_magic() {
        let session = TarSum::new(Version::V0);
        let mut blob = session.checkpoint().unwrap();
        blob[0] ^= 0xff;

        let mut target = TarSum::new(Version::V0);
        assert!(matches!(
            target.restore(&blob),
            Err(DigestError::CorruptState(_))
        ));
    }
}
