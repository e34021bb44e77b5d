//! Incremental tar entry header decoding.
//!
//! The decoder operates on a caller-owned byte buffer and never performs
//! I/O: it either yields a complete header (possibly assembled from a chain
//! of GNU longname/longlink and PAX records plus the real header block),
//! reports that more bytes are required, or recognizes the two-zero-block
//! end-of-archive terminator. Between calls it keeps no state, so the only
//! continuation state a suspended session must persist is the raw buffer.
//!
//! Supported framing: USTAR base headers, GNU `L` (longname) and `K`
//! (longlink) records, PAX `x` extended headers (`g` globals are consumed
//! but not applied), octal and GNU base-256 numeric fields, and header
//! checksum verification accepting both unsigned and signed byte sums.

use std::collections::BTreeMap;
use std::fmt;

/// Fixed archive block size
pub const BLOCK_SIZE: usize = 512;

const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// One decoded entry header with PAX/GNU overrides already merged.
///
/// String fields hold the raw (unnormalized) values from the archive;
/// entry-name normalization is an aggregation concern, not a decoding one.
/// Non-UTF-8 bytes in names and other string fields decode lossily (each
/// invalid sequence becomes U+FFFD), so digests are stable for any input
/// but only interchange-compatible with other producers when the archive's
/// metadata is valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TarHeader {
    pub name: String,
    pub mode: i64,
    pub uid: i64,
    pub gid: i64,
    pub size: i64,
    pub mtime: i64,
    pub typeflag: u8,
    pub linkname: String,
    pub uname: String,
    pub gname: String,
    pub devmajor: i64,
    pub devminor: i64,
    /// Extended attributes, keyed byte-wise (case-sensitive)
    pub xattrs: BTreeMap<String, String>,
}

/// Outcome of one decode attempt over the buffered bytes.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeaderOutcome {
    /// A full header was decoded; the first `consumed` buffer bytes
    /// (meta-record chain included) belong to it.
    Complete {
        header: Box<TarHeader>,
        consumed: usize,
    },
    /// Not enough bytes buffered to decide; retry after the next write.
    NeedMoreBytes,
    /// The buffer starts with the two-zero-block terminator.
    EndOfArchive,
}

/// Why a header chain failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeaderDecodeError {
    BadChecksum,
    BadNumericField(&'static str),
    NegativeSize,
    /// Single zero block where a header was required
    UnexpectedTerminator,
    BadPaxRecord,
}

impl fmt::Display for HeaderDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadChecksum => write!(f, "header checksum mismatch"),
            Self::BadNumericField(field) => write!(f, "invalid numeric {} field", field),
            Self::NegativeSize => write!(f, "negative entry size"),
            Self::UnexpectedTerminator => write!(f, "lone zero block where a header was required"),
            Self::BadPaxRecord => write!(f, "malformed pax extended header record"),
        }
    }
}

/// Trailing padding after `size` content bytes, up to the next block boundary.
///
/// `BLOCK_SIZE` is a power of two, so `-size mod BLOCK_SIZE` reduces to a mask.
pub(crate) fn block_padding(size: u64) -> u64 {
    size.wrapping_neg() & (BLOCK_SIZE as u64 - 1)
}

/// Attempt to decode the next entry header from the front of `buf`.
///
/// Decoding is only attempted once at least two blocks are buffered: one
/// block is the minimum header size, and two let a real header be told apart
/// from the terminator marker without consuming anything.
pub(crate) fn decode_next(buf: &[u8]) -> Result<HeaderOutcome, HeaderDecodeError> {
    if buf.len() < 2 * BLOCK_SIZE {
        return Ok(HeaderOutcome::NeedMoreBytes);
    }
    if is_zero_block(&buf[..BLOCK_SIZE]) {
        if is_zero_block(&buf[BLOCK_SIZE..2 * BLOCK_SIZE]) {
            return Ok(HeaderOutcome::EndOfArchive);
        }
        return Err(HeaderDecodeError::UnexpectedTerminator);
    }

    let mut offset = 0usize;
    let mut longname: Option<String> = None;
    let mut longlink: Option<String> = None;
    let mut pax_records: Option<Vec<(String, String)>> = None;

    loop {
        if buf.len() < offset + BLOCK_SIZE {
            return Ok(HeaderOutcome::NeedMoreBytes);
        }
        let block = &buf[offset..offset + BLOCK_SIZE];
        if is_zero_block(block) {
            // A terminator cannot interrupt a meta-record chain.
            return Err(HeaderDecodeError::UnexpectedTerminator);
        }
        verify_checksum(block)?;

        let typeflag = block[156];
        let size = parse_numeric(&block[124..136])
            .ok_or(HeaderDecodeError::BadNumericField("size"))?;
        if size < 0 {
            return Err(HeaderDecodeError::NegativeSize);
        }
        let size = size as u64;

        match typeflag {
            b'L' | b'K' | b'x' | b'g' => {
                let data_start = offset + BLOCK_SIZE;
                let data_end = data_start + size as usize;
                let record_end = data_end + block_padding(size) as usize;
                if buf.len() < record_end {
                    return Ok(HeaderOutcome::NeedMoreBytes);
                }
                let data = &buf[data_start..data_end];
                match typeflag {
                    b'L' => longname = Some(cstring(data)),
                    b'K' => longlink = Some(cstring(data)),
                    b'x' => pax_records = Some(parse_pax_records(data)?),
                    // Global pax data is consumed to keep alignment but
                    // intentionally not applied to subsequent entries.
                    _ => {}
                }
                offset = record_end;
            }
            _ => {
                let mut header = parse_ustar_block(block)?;
                if let Some(name) = longname {
                    header.name = name;
                }
                if let Some(link) = longlink {
                    header.linkname = link;
                }
                if let Some(records) = pax_records {
                    apply_pax_records(&mut header, records)?;
                }
                if header.size < 0 {
                    return Err(HeaderDecodeError::NegativeSize);
                }
                return Ok(HeaderOutcome::Complete {
                    header: Box::new(header),
                    consumed: offset + BLOCK_SIZE,
                });
            }
        }
    }
}

fn parse_ustar_block(block: &[u8]) -> Result<TarHeader, HeaderDecodeError> {
    let mut header = TarHeader {
        name: cstring(&block[0..100]),
        mode: parse_numeric(&block[100..108])
            .ok_or(HeaderDecodeError::BadNumericField("mode"))?,
        uid: parse_numeric(&block[108..116]).ok_or(HeaderDecodeError::BadNumericField("uid"))?,
        gid: parse_numeric(&block[116..124]).ok_or(HeaderDecodeError::BadNumericField("gid"))?,
        size: parse_numeric(&block[124..136])
            .ok_or(HeaderDecodeError::BadNumericField("size"))?,
        mtime: parse_numeric(&block[136..148])
            .ok_or(HeaderDecodeError::BadNumericField("mtime"))?,
        typeflag: block[156],
        linkname: cstring(&block[157..257]),
        ..TarHeader::default()
    };

    // The ownership and prefix fields are only meaningful under a ustar
    // (POSIX or GNU) magic; pre-POSIX archives leave them as garbage.
    if &block[257..262] == b"ustar" {
        header.uname = cstring(&block[265..297]);
        header.gname = cstring(&block[297..329]);
        header.devmajor = parse_numeric(&block[329..337])
            .ok_or(HeaderDecodeError::BadNumericField("devmajor"))?;
        header.devminor = parse_numeric(&block[337..345])
            .ok_or(HeaderDecodeError::BadNumericField("devminor"))?;
        let prefix = cstring(&block[345..500]);
        if !prefix.is_empty() {
            header.name = format!("{}/{}", prefix, header.name);
        }
    }

    Ok(header)
}

fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Recorded checksums may have been computed over signed or unsigned bytes
/// depending on the producer; both are accepted.
fn verify_checksum(block: &[u8]) -> Result<(), HeaderDecodeError> {
    let recorded =
        parse_octal(&block[CHECKSUM_RANGE]).ok_or(HeaderDecodeError::BadChecksum)?;

    let mut unsigned: i64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let v = if CHECKSUM_RANGE.contains(&i) { b' ' } else { b };
        unsigned += v as i64;
        signed += (v as i8) as i64;
    }

    if recorded == unsigned || recorded == signed {
        Ok(())
    } else {
        Err(HeaderDecodeError::BadChecksum)
    }
}

/// Parse a numeric field: GNU base-256 when the high bit of the first byte
/// is set, NUL/space-padded octal otherwise.
fn parse_numeric(field: &[u8]) -> Option<i64> {
    if let Some((&first, rest)) = field.split_first() {
        if first & 0x80 != 0 {
            let mut value = (first & 0x7f) as i64;
            for &b in rest {
                value = (value << 8) | b as i64;
            }
            return Some(value);
        }
    }
    parse_octal(field)
}

fn parse_octal(field: &[u8]) -> Option<i64> {
    let trimmed: &[u8] = {
        let start = field
            .iter()
            .position(|&b| b != 0 && b != b' ')
            .unwrap_or(field.len());
        let end = field[start..]
            .iter()
            .position(|&b| b == 0 || b == b' ')
            .map_or(field.len(), |i| start + i);
        &field[start..end]
    };
    if trimmed.is_empty() {
        return Some(0);
    }
    let mut value: i64 = 0;
    for &b in trimmed {
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        value = value.checked_mul(8)?.checked_add((b - b'0') as i64)?;
    }
    Some(value)
}

/// Bytes of a NUL-terminated field as a string (lossy for non-UTF-8 names).
fn cstring(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Parse pax extended header data: a sequence of `"<len> <key>=<value>\n"`
/// records where `<len>` counts the entire record including itself.
fn parse_pax_records(mut data: &[u8]) -> Result<Vec<(String, String)>, HeaderDecodeError> {
    let mut records = Vec::new();
    while !data.is_empty() {
        let space = data
            .iter()
            .position(|&b| b == b' ')
            .ok_or(HeaderDecodeError::BadPaxRecord)?;
        let len: usize = std::str::from_utf8(&data[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(HeaderDecodeError::BadPaxRecord)?;
        if len <= space + 1 || len > data.len() {
            return Err(HeaderDecodeError::BadPaxRecord);
        }
        let record = &data[space + 1..len];
        let record = record
            .strip_suffix(b"\n")
            .ok_or(HeaderDecodeError::BadPaxRecord)?;
        let eq = record
            .iter()
            .position(|&b| b == b'=')
            .ok_or(HeaderDecodeError::BadPaxRecord)?;
        records.push((
            String::from_utf8_lossy(&record[..eq]).into_owned(),
            String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
        ));
        data = &data[len..];
    }
    Ok(records)
}

fn apply_pax_records(
    header: &mut TarHeader,
    records: Vec<(String, String)>,
) -> Result<(), HeaderDecodeError> {
    for (key, value) in records {
        match key.as_str() {
            "path" => header.name = value,
            "linkpath" => header.linkname = value,
            "uname" => header.uname = value,
            "gname" => header.gname = value,
            "uid" => header.uid = parse_pax_decimal(&value)?,
            "gid" => header.gid = parse_pax_decimal(&value)?,
            "size" => header.size = parse_pax_decimal(&value)?,
            // Sub-second precision is dropped; canonicalization uses whole
            // seconds.
            "mtime" => header.mtime = parse_pax_seconds(&value)?,
            _ => {
                if let Some(xattr_key) = key.strip_prefix(PAX_XATTR_PREFIX) {
                    header.xattrs.insert(xattr_key.to_owned(), value);
                }
            }
        }
    }
    Ok(())
}

fn parse_pax_decimal(value: &str) -> Result<i64, HeaderDecodeError> {
    value.parse().map_err(|_| HeaderDecodeError::BadPaxRecord)
}

fn parse_pax_seconds(value: &str) -> Result<i64, HeaderDecodeError> {
    let whole = value.split('.').next().unwrap_or(value);
    parse_pax_decimal(whole)
}
