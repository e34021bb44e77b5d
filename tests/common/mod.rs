//! Deterministic in-memory tar builder for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

pub const BLOCK: usize = 512;

/// One archive member with the header fields the digest policies care about.
pub struct TarEntry {
    pub name: String,
    pub body: Vec<u8>,
    pub typeflag: u8,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub mtime: i64,
    pub linkname: String,
    pub uname: String,
    pub gname: String,
    pub xattrs: BTreeMap<String, String>,
}

impl TarEntry {
    pub fn file(name: &str, body: &[u8]) -> Self {
        Self {
            name: name.to_owned(),
            body: body.to_vec(),
            typeflag: b'0',
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            linkname: String::new(),
            uname: String::new(),
            gname: String::new(),
            xattrs: BTreeMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(mut self, uid: u64, gid: u64, uname: &str, gname: &str) -> Self {
        self.uid = uid;
        self.gid = gid;
        self.uname = uname.to_owned();
        self.gname = gname.to_owned();
        self
    }

    pub fn with_xattr(mut self, key: &str, value: &str) -> Self {
        self.xattrs.insert(key.to_owned(), value.to_owned());
        self
    }
}

fn write_octal(block: &mut [u8], range: std::ops::Range<usize>, value: u64) {
    let width = range.len();
    let text = format!("{:0width$o}\0", value, width = width - 1);
    block[range].copy_from_slice(text.as_bytes());
}

fn write_str(block: &mut [u8], offset: usize, text: &str) {
    block[offset..offset + text.len()].copy_from_slice(text.as_bytes());
}

fn finish_checksum(block: &mut [u8; BLOCK]) {
    block[148..156].fill(b' ');
    let sum: u64 = block.iter().map(|&b| b as u64).sum();
    let text = format!("{:06o}\0 ", sum);
    block[148..156].copy_from_slice(text.as_bytes());
}

fn header_block(
    name: &str,
    size: u64,
    typeflag: u8,
    mode: u32,
    uid: u64,
    gid: u64,
    mtime: i64,
    linkname: &str,
    uname: &str,
    gname: &str,
) -> [u8; BLOCK] {
    let mut block = [0u8; BLOCK];
    write_str(&mut block, 0, name);
    write_octal(&mut block, 100..108, mode as u64);
    write_octal(&mut block, 108..116, uid);
    write_octal(&mut block, 116..124, gid);
    write_octal(&mut block, 124..136, size);
    write_octal(&mut block, 136..148, mtime as u64);
    block[156] = typeflag;
    write_str(&mut block, 157, linkname);
    write_str(&mut block, 257, "ustar\0");
    write_str(&mut block, 263, "00");
    write_str(&mut block, 265, uname);
    write_str(&mut block, 297, gname);
    write_octal(&mut block, 329..337, 0);
    write_octal(&mut block, 337..345, 0);
    finish_checksum(&mut block);
    block
}

fn push_padded(out: &mut Vec<u8>, body: &[u8]) {
    out.extend_from_slice(body);
    let rem = body.len() % BLOCK;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(BLOCK - rem));
    }
}

/// One pax record, `"len key=value\n"` where len counts the whole record.
fn pax_record(key: &str, value: &str) -> Vec<u8> {
    // The length field counts its own digits, so grow it to a fixpoint.
    let base = key.len() + value.len() + 3;
    let mut len = base + base.to_string().len();
    len = base + len.to_string().len();
    format!("{} {}={}\n", len, key, value).into_bytes()
}

fn push_entry(out: &mut Vec<u8>, entry: &TarEntry) {
    if !entry.xattrs.is_empty() {
        let mut records = Vec::new();
        for (key, value) in &entry.xattrs {
            records.extend(pax_record(&format!("SCHILY.xattr.{}", key), value));
        }
        let pax_header = header_block(
            &format!("PaxHeaders.0/{}", entry.name),
            records.len() as u64,
            b'x',
            0o644,
            0,
            0,
            0,
            "",
            "",
            "",
        );
        out.extend_from_slice(&pax_header);
        push_padded(out, &records);
    }
    let header = header_block(
        &entry.name,
        entry.body.len() as u64,
        entry.typeflag,
        entry.mode,
        entry.uid,
        entry.gid,
        entry.mtime,
        &entry.linkname,
        &entry.uname,
        &entry.gname,
    );
    out.extend_from_slice(&header);
    push_padded(out, &entry.body);
}

/// Serialize the entries into a complete archive with the two-block terminator.
pub fn build_archive(entries: &[TarEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        push_entry(&mut out, entry);
    }
    out.extend(std::iter::repeat(0u8).take(2 * BLOCK));
    out
}
