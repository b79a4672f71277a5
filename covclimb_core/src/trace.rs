//! Reading and writing SanitizerCoverage (`.sancov`) trace files.
//!
//! A trace file starts with an 8-byte little-endian magic that selects the
//! word size, followed by a packed array of little-endian offsets of that
//! size. The instrumented process writes one file per module, named
//! `<module>.<pid>.sancov`, into its working directory.

use crate::coverage::{CoverageSet, Location};
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic selecting 4-byte offsets.
pub const MAGIC_32: u64 = 0xC0BF_FFFF_FFFF_FF32;
/// Magic selecting 8-byte offsets.
pub const MAGIC_64: u64 = 0xC0BF_FFFF_FFFF_FF64;
/// Extension the sanitizer runtime gives its coverage dumps.
pub const DEFAULT_TRACE_EXTENSION: &str = "sancov";

const HEADER_LEN: usize = 8;

/// Why a header was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderFault {
    #[error("file is {0} bytes, shorter than the 8-byte header")]
    TooShort(usize),
    #[error("unrecognized magic {0:#018x}")]
    UnknownMagic(u64),
}

#[derive(Error, Debug)]
pub enum TraceError {
    /// The run left no trace file behind; instrumentation is missing or misconfigured.
    #[error("Expected SanitizerCoverage files for pid {pid} in {dir:?}, found none")]
    MissingTraces { dir: PathBuf, pid: u32 },
    #[error("Invalid SanitizerCoverage header in {file}: {fault}")]
    InvalidHeader { file: String, fault: HeaderFault },
    #[error("SanitizerCoverage file {file} ends with {trailing} stray byte(s) after the last {word_bytes}-byte offset")]
    TruncatedBody {
        file: String,
        trailing: usize,
        word_bytes: usize,
    },
    #[error("Trace file name {0:?} does not follow <module>.<pid>.<extension>")]
    InvalidFileName(String),
    #[error("Offset {offset:#x} does not fit in a 32-bit trace word")]
    OffsetOverflow { offset: u64 },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Width of the offsets stored in a trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Bits32,
    Bits64,
}

impl WordSize {
    pub fn bytes(self) -> usize {
        match self {
            WordSize::Bits32 => 4,
            WordSize::Bits64 => 8,
        }
    }

    pub fn magic(self) -> u64 {
        match self {
            WordSize::Bits32 => MAGIC_32,
            WordSize::Bits64 => MAGIC_64,
        }
    }

    pub fn from_magic(magic: u64) -> Option<Self> {
        match magic {
            MAGIC_32 => Some(WordSize::Bits32),
            MAGIC_64 => Some(WordSize::Bits64),
            _ => None,
        }
    }

    /// The word size the runtime of a process built for this host would emit.
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            WordSize::Bits64
        } else {
            WordSize::Bits32
        }
    }
}

/// Module name embedded in a trace file name: everything before the last two
/// `.`-separated components.
///
/// `libfoo.so.1234.sancov` yields `libfoo.so`. Returns `None` when the name has
/// fewer than three components or the module part is empty.
pub fn module_name(file_name: &str) -> Option<&str> {
    let mut parts = file_name.rsplitn(3, '.');
    let _extension = parts.next()?;
    let _pid = parts.next()?;
    parts.next().filter(|module| !module.is_empty())
}

/// Whether `file_name` is `<module>.<pid>.<extension>` for this pid and extension.
pub fn is_trace_for(file_name: &str, pid: u32, extension: &str) -> bool {
    let mut parts = file_name.rsplitn(3, '.');
    let (Some(ext), Some(pid_part), Some(module)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    !module.is_empty() && ext == extension && pid_part == pid.to_string()
}

/// Lists the trace files `pid` left in `dir`, sorted by path.
pub fn find_trace_files(dir: &Path, pid: u32, extension: &str) -> Result<Vec<PathBuf>, TraceError> {
    let io_err = |source| TraceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| is_trace_for(name, pid, extension));
        if matches && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Decodes the contents of one trace file into locations of the module named
/// by `file_name`.
pub fn decode_trace(file_name: &str, data: &[u8]) -> Result<CoverageSet, TraceError> {
    let module =
        module_name(file_name).ok_or_else(|| TraceError::InvalidFileName(file_name.to_string()))?;

    if data.len() < HEADER_LEN {
        return Err(TraceError::InvalidHeader {
            file: file_name.to_string(),
            fault: HeaderFault::TooShort(data.len()),
        });
    }
    let (header, body) = data.split_at(HEADER_LEN);
    let mut magic_bytes = [0u8; HEADER_LEN];
    magic_bytes.copy_from_slice(header);
    let magic = u64::from_le_bytes(magic_bytes);
    let word_size = WordSize::from_magic(magic).ok_or_else(|| TraceError::InvalidHeader {
        file: file_name.to_string(),
        fault: HeaderFault::UnknownMagic(magic),
    })?;

    let words = body.chunks_exact(word_size.bytes());
    if !words.remainder().is_empty() {
        return Err(TraceError::TruncatedBody {
            file: file_name.to_string(),
            trailing: words.remainder().len(),
            word_bytes: word_size.bytes(),
        });
    }

    Ok(words
        .map(|word| {
            // Little-endian, so zero-extending a 4-byte word is a prefix copy.
            let mut buf = [0u8; 8];
            buf[..word.len()].copy_from_slice(word);
            Location::new(module, u64::from_le_bytes(buf))
        })
        .collect())
}

/// Serializes offsets the way the sanitizer runtime dumps them.
pub fn encode_trace(word_size: WordSize, offsets: &[u64]) -> Result<Vec<u8>, TraceError> {
    let mut out = Vec::with_capacity(HEADER_LEN + offsets.len() * word_size.bytes());
    out.extend_from_slice(&word_size.magic().to_le_bytes());
    for &offset in offsets {
        match word_size {
            WordSize::Bits32 => {
                let word = u32::try_from(offset)
                    .map_err(|_| TraceError::OffsetOverflow { offset })?;
                out.extend_from_slice(&word.to_le_bytes());
            }
            WordSize::Bits64 => out.extend_from_slice(&offset.to_le_bytes()),
        }
    }
    Ok(out)
}

/// Trace files of one execution that still have to be consumed.
///
/// Whatever is left pending when the batch is dropped gets deleted, so a decode
/// failure halfway through never leaves files behind for a later run that
/// happens to reuse the pid.
struct TraceBatch {
    pending: Vec<PathBuf>,
}

impl TraceBatch {
    fn new(mut paths: Vec<PathBuf>) -> Self {
        // Consumed from the back.
        paths.reverse();
        Self { pending: paths }
    }

    fn next_file(&mut self) -> Option<PathBuf> {
        self.pending.pop()
    }
}

impl Drop for TraceBatch {
    fn drop(&mut self) {
        for path in self.pending.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove leftover trace file {path:?}: {e}");
            }
        }
    }
}

/// Reads a trace file and removes it, whether or not the read succeeded.
fn consume_file(path: &Path) -> Result<Vec<u8>, TraceError> {
    let read = fs::read(path);
    let removed = fs::remove_file(path);
    let data = read.map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    removed.map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(data)
}

/// Decodes and deletes every trace file `pid` left in `dir`, returning the
/// union of their locations.
///
/// At least one file must exist; an execution that produced none is reported
/// as `TraceError::MissingTraces`.
pub fn collect_coverage(dir: &Path, pid: u32, extension: &str) -> Result<CoverageSet, TraceError> {
    let paths = find_trace_files(dir, pid, extension)?;
    if paths.is_empty() {
        return Err(TraceError::MissingTraces {
            dir: dir.to_path_buf(),
            pid,
        });
    }

    let mut batch = TraceBatch::new(paths);
    let mut coverage = CoverageSet::new();
    while let Some(path) = batch.next_file() {
        let data = consume_file(&path)?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let decoded = decode_trace(file_name, &data)?;
        debug!("{file_name}: {} offsets", decoded.len());
        coverage.merge(&decoded);
    }
    Ok(coverage)
}

/// Deletes the trace files of `pid` without decoding them. Returns how many
/// were removed.
pub fn discard_traces(dir: &Path, pid: u32, extension: &str) -> Result<usize, TraceError> {
    let paths = find_trace_files(dir, pid, extension)?;
    let count = paths.len();
    drop(TraceBatch::new(paths));
    Ok(count)
}
