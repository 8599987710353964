//! Streaming tar reader and a small ustar writer
//!
//! # Usage
//!
//! ## Reading TAR Archives
//!
//! ```rust
//! use unitypack_extract::tar::{write_tar, Archive, TarEntry};
//!
//! let bytes = write_tar(&[TarEntry::file("hello.txt", b"Hello, World".to_vec())]);
//! let mut archive = Archive::new(&bytes[..]);
//!
//! while let Some(entry) = archive.next_entry().unwrap() {
//!     println!("File name: {}", entry.header.path());
//!     println!("Size: {} bytes", entry.header.size);
//! }
//! ```
//!
//! ## Creating TAR Archives
//!
//! ```rust
//! use unitypack_extract::tar::{write_tar, TarEntry};
//!
//! let entries = vec![
//!     TarEntry::dir("0a1b2c"),
//!     TarEntry::file("0a1b2c/pathname", b"Assets/Readme.txt".to_vec()),
//! ];
//! let tar_data = write_tar(&entries);
//! assert_eq!(tar_data.len() % 512, 0);
//! ```

use std::io::{self, Read, Write};
use std::ops::Range;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};

/// Size of a tar header and of the data padding unit.
pub const BLOCK_SIZE: usize = 512;

const NAME_LEN: usize = 100;
const LONG_LINK: &str = "././@LongLink";

pub const TYPE_FILE: u8 = b'0';
pub const TYPE_DIR: u8 = b'5';
pub const TYPE_GNU_LONGNAME: u8 = b'L';
pub const TYPE_PAX_LOCAL: u8 = b'x';
pub const TYPE_PAX_GLOBAL: u8 = b'g';

// Tar header struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: u64,
    pub checksum: u32,
    pub typeflag: u8,
    pub linkname: String,
    pub magic: String,
    pub version: String,
    pub uname: String,
    pub gname: String,
    pub prefix: String,
}

impl TarHeader {
    /// Create a new TarHeader with minimal required fields
    /// Other fields are filled with default values
    pub fn new(name: String, mode: u32, size: u64) -> Self {
        Self {
            name,
            mode,
            size,
            uid: 0,
            gid: 0,
            mtime: 0,
            checksum: 0,
            typeflag: TYPE_FILE,
            linkname: String::new(),
            magic: "ustar".to_string(),
            version: "00".to_string(),
            uname: String::new(),
            gname: String::new(),
            prefix: String::new(),
        }
    }

    /// Parse a TarHeader from a 512-byte block
    pub fn from_bytes(data: &[u8; BLOCK_SIZE]) -> Self {
        parse_tar_header(data)
    }

    /// Convert the TarHeader to a 512-byte block with a fresh checksum
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        create_tar_header(self)
    }

    /// Verify the stored checksum against the raw header block
    pub fn verify_checksum(&self, data: &[u8]) -> bool {
        calc_checksum(data) == self.checksum
    }

    /// Full member path, joining the ustar prefix when one is present.
    pub fn path(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.prefix, self.name)
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.typeflag, TYPE_FILE | 0 | b'7')
    }

    pub fn is_dir(&self) -> bool {
        self.typeflag == TYPE_DIR || (self.typeflag == 0 && self.name.ends_with('/'))
    }

    /// Modification time, or `None` when the archive left it unset.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        if self.mtime == 0 {
            return None;
        }
        i64::try_from(self.mtime)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Tar entry struct
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub header: TarHeader,
    pub data: Vec<u8>,
}

impl TarEntry {
    /// Regular file entry with mode 0o644.
    pub fn file(name: &str, data: Vec<u8>) -> Self {
        let header = TarHeader::new(name.to_string(), 0o644, data.len() as u64);
        Self { header, data }
    }

    /// Directory entry with mode 0o755.
    pub fn dir(name: &str) -> Self {
        let mut name = name.trim_end_matches('/').to_string();
        name.push('/');
        let mut header = TarHeader::new(name, 0o755, 0);
        header.typeflag = TYPE_DIR;
        Self {
            header,
            data: Vec::new(),
        }
    }
}

/// Pull-based reader yielding one entry at a time.
///
/// GNU long-name and pax extended headers are folded into the entry they
/// describe, so callers only ever see real members. Member data is left in
/// the stream until the caller reads or copies it; unread data is skipped by
/// the next call to [`Archive::next_header`].
pub struct Archive<R: Read> {
    reader: R,
    finished: bool,
    pending: Option<Pending>,
}

/// Data of the current member still waiting in the stream.
struct Pending {
    path: String,
    size: u64,
}

impl<R: Read> Archive<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
            pending: None,
        }
    }

    /// Reads the next member header. `Ok(None)` marks the end of the archive.
    pub fn next_header(&mut self) -> Result<Option<TarHeader>> {
        self.transfer(&mut io::sink())?;

        let mut pending_name: Option<String> = None;
        let mut block = [0u8; BLOCK_SIZE];

        while !self.finished {
            if !self.read_block(&mut block)? || is_empty_block(&block) {
                self.finished = true;
                break;
            }

            let mut header = parse_tar_header(&block);
            if !header.verify_checksum(&block) {
                return Err(Error::Decode(format!(
                    "bad header checksum for '{}'",
                    header.path()
                )));
            }
            self.pending = Some(Pending {
                path: header.path(),
                size: header.size,
            });

            match header.typeflag {
                TYPE_GNU_LONGNAME => {
                    pending_name = Some(read_c_string(&self.read_data()?));
                }
                TYPE_PAX_LOCAL => {
                    if let Some(path) = pax_path(&self.read_data()?) {
                        pending_name = Some(path);
                    }
                }
                TYPE_PAX_GLOBAL => {
                    debug!("ignoring global pax header");
                    self.transfer(&mut io::sink())?;
                }
                _ => {
                    if let Some(name) = pending_name.take() {
                        header.name = name;
                        header.prefix.clear();
                        if let Some(pending) = self.pending.as_mut() {
                            pending.path = header.path();
                        }
                    }
                    return Ok(Some(header));
                }
            }
        }

        if pending_name.is_some() {
            return Err(Error::Decode(
                "extended header not followed by an entry".to_string(),
            ));
        }
        Ok(None)
    }

    /// Reads the next member together with its data.
    pub fn next_entry(&mut self) -> Result<Option<TarEntry>> {
        match self.next_header()? {
            Some(header) => {
                let data = self.read_data()?;
                Ok(Some(TarEntry { header, data }))
            }
            None => Ok(None),
        }
    }

    /// Buffers the current member's data.
    pub fn read_data(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.transfer(&mut data)?;
        Ok(data)
    }

    /// Streams the current member's data into `writer`.
    ///
    /// Failures of the archive stream are decode errors; failures of `writer`
    /// come back as [`Error::Io`].
    pub fn copy_data<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        self.transfer(writer)
    }

    /// Fills `block`; returns false on a clean end of stream.
    fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::DecodeIo(e)),
            }
        }
        match filled {
            0 => Ok(false),
            BLOCK_SIZE => Ok(true),
            _ => Err(Error::Decode("unexpected end of archive".to_string())),
        }
    }

    fn transfer<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        let Some(Pending { path, size }) = self.pending.take() else {
            return Ok(0);
        };

        let mut buf = [0u8; 8192];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match self.reader.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(Error::Decode(format!(
                        "entry '{}' truncated: expected {} bytes, found {}",
                        path,
                        size,
                        size - remaining
                    )));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::DecodeIo(e)),
            };
            writer.write_all(&buf[..n])?;
            remaining -= n as u64;
        }

        let padding = padding_for(size);
        let skipped = io::copy(&mut (&mut self.reader).take(padding), &mut io::sink())
            .map_err(Error::DecodeIo)?;
        if skipped < padding {
            return Err(Error::Decode(format!("entry '{}' missing block padding", path)));
        }
        Ok(size)
    }
}

impl<R: Read> Iterator for Archive<R> {
    type Item = Result<TarEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.finished = true;
                self.pending = None;
                Some(Err(e))
            }
        }
    }
}

/// Check if a block is empty (all zeros)
fn is_empty_block(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

fn padding_for(size: u64) -> u64 {
    let rem = size % BLOCK_SIZE as u64;
    if rem == 0 { 0 } else { BLOCK_SIZE as u64 - rem }
}

fn read_c_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn read_tar_str(data: &[u8], range: Range<usize>) -> String {
    read_c_string(&data[range])
}

fn read_tar_num(data: &[u8], range: Range<usize>) -> u64 {
    let field = &data[range];
    // GNU base-256 encoding for values that overflow the octal field
    if field.first().is_some_and(|b| b & 0x80 != 0) {
        return field[1..]
            .iter()
            .fold(u64::from(field[0] & 0x7f), |acc, &b| (acc << 8) | u64::from(b));
    }
    let s = read_c_string(field);
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }
    u64::from_str_radix(s, 8).unwrap_or(0)
}

fn read_tar_u32(data: &[u8], range: Range<usize>) -> u32 {
    u32::try_from(read_tar_num(data, range)).unwrap_or(0)
}

/// Extracts `path` from pax extended header records (`"<len> key=value\n"`).
fn pax_path(data: &[u8]) -> Option<String> {
    let mut rest = data;
    let mut path = None;
    while !rest.is_empty() {
        let space = rest.iter().position(|&b| b == b' ')?;
        let len: usize = std::str::from_utf8(&rest[..space]).ok()?.parse().ok()?;
        if len <= space || len > rest.len() {
            return None;
        }
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(value) = record.strip_prefix(b"path=") {
            path = Some(String::from_utf8_lossy(value).into_owned());
        }
        rest = &rest[len..];
    }
    path
}

fn parse_tar_header(data: &[u8; BLOCK_SIZE]) -> TarHeader {
    TarHeader {
        name: read_tar_str(data, 0..100),
        mode: read_tar_u32(data, 100..108),
        uid: read_tar_u32(data, 108..116),
        gid: read_tar_u32(data, 116..124),
        size: read_tar_num(data, 124..136),
        mtime: read_tar_num(data, 136..148),
        checksum: read_tar_u32(data, 148..156),
        typeflag: data[156],
        linkname: read_tar_str(data, 157..257),
        magic: read_tar_str(data, 257..263),
        version: read_tar_str(data, 263..265),
        uname: read_tar_str(data, 265..297),
        gname: read_tar_str(data, 297..329),
        // old GNU headers reuse the prefix area for other fields
        prefix: if data[257..263] == *b"ustar\0" {
            read_tar_str(data, 345..500)
        } else {
            String::new()
        },
    }
}

/// Writes entries to a complete tar stream, including the two zero end blocks.
///
/// Names longer than the 100-byte field get a GNU long-name header.
pub fn write_tar(entries: &[TarEntry]) -> Vec<u8> {
    let mut tar_data = Vec::new();
    for entry in entries {
        if entry.header.name.len() > NAME_LEN {
            let mut link_data = entry.header.name.as_bytes().to_vec();
            link_data.push(0);
            let mut link = TarHeader::new(LONG_LINK.to_string(), 0o644, link_data.len() as u64);
            link.typeflag = TYPE_GNU_LONGNAME;
            append_entry(&mut tar_data, &link, &link_data);
        }
        append_entry(&mut tar_data, &entry.header, &entry.data);
    }
    tar_data.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
    tar_data
}

fn append_entry(tar_data: &mut Vec<u8>, header: &TarHeader, data: &[u8]) {
    tar_data.extend_from_slice(&create_tar_header(header));
    tar_data.extend_from_slice(data);
    let padding = padding_for(data.len() as u64) as usize;
    tar_data.resize(tar_data.len() + padding, 0);
}

fn put_str(data: &mut [u8], range: Range<usize>, value: &str) {
    let field = &mut data[range];
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

fn put_octal(data: &mut [u8], range: Range<usize>, value: u64) {
    // width leaves room for the NUL terminator
    let width = range.len() - 1;
    let digits = format!("{:0width$o}", value, width = width);
    if digits.len() <= width {
        put_str(data, range, &digits);
    } else {
        let field = &mut data[range];
        field.fill(0);
        field[0] = 0x80;
        let bytes = value.to_be_bytes();
        let n = bytes.len().min(field.len() - 1);
        let start = field.len() - n;
        field[start..].copy_from_slice(&bytes[bytes.len() - n..]);
    }
}

fn create_tar_header(header: &TarHeader) -> [u8; BLOCK_SIZE] {
    let mut data = [0u8; BLOCK_SIZE];
    put_str(&mut data, 0..100, &header.name);
    put_octal(&mut data, 100..108, u64::from(header.mode));
    put_octal(&mut data, 108..116, u64::from(header.uid));
    put_octal(&mut data, 116..124, u64::from(header.gid));
    put_octal(&mut data, 124..136, header.size);
    put_octal(&mut data, 136..148, header.mtime);
    data[156] = header.typeflag;
    put_str(&mut data, 157..257, &header.linkname);
    put_str(&mut data, 257..263, &header.magic);
    put_str(&mut data, 263..265, &header.version);
    put_str(&mut data, 265..297, &header.uname);
    put_str(&mut data, 297..329, &header.gname);
    put_str(&mut data, 345..500, &header.prefix);

    let checksum = calc_checksum(&data);
    put_str(&mut data, 148..156, &format!("{:06o}\0 ", checksum));
    data
}

/// Calc checksum of the header bytes, counting the checksum field as spaces
pub fn calc_checksum(data: &[u8]) -> u32 {
    if data.len() < BLOCK_SIZE {
        return 0;
    }
    data.iter()
        .take(BLOCK_SIZE)
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { u32::from(b' ') } else { u32::from(b) })
        .sum()
}
