// src/obj_reader.rs
//! Streaming OBJ cleaner.
//!
//! Reads a raw OBJ file line by line and re-emits it with single-name group declarations
//! consumed. Lines are raw bytes; only the tokens that are parsed need to be UTF-8. While
//! streaming it
//! - hashes every run of consecutive `v` lines (one vertex block) and counts blocks whose
//!   content was already seen, to detect files that are two verbatim copies of one mesh,
//! - tracks the current group (default `"default"`) and records, in emission order, the
//!   group of every `f` line together with the vertex indices it references.
//!
//! Lines are classified by their first whitespace-separated token (`line_keyword`), the
//! same way the loader classifies them, so face numbers agree between the two passes.
//! Only one block hash is in flight at a time; the file itself is never buffered.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Error, Result};

pub const DEFAULT_GROUP: &str = "default";

pub struct ObjStreamCleaner<R> {
    reader: R,
    path: PathBuf,
    buf: Vec<u8>,

    current_group: String,
    current_group_id: Option<u32>,
    group_names: IndexSet<String>,
    group_indices: Vec<HashSet<u32>>,
    prim_groups: Vec<u32>,

    block: Option<Xxh3>,
    seen_blocks: HashSet<u64>,
    vertex_blocks: usize,
    duplicate_blocks: usize,
}

impl ObjStreamCleaner<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::MissingSource(path.to_path_buf())
            } else {
                Error::io(path, e)
            }
        })?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: BufRead> ObjStreamCleaner<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            path: path.into(),
            buf: Vec::new(),
            current_group: DEFAULT_GROUP.to_string(),
            current_group_id: None,
            group_names: IndexSet::new(),
            group_indices: Vec::new(),
            prim_groups: Vec::new(),
            block: None,
            seen_blocks: HashSet::new(),
            vertex_blocks: 0,
            duplicate_blocks: 0,
        }
    }

    /// Next line to emit (newline included), or `None` at end of stream.
    pub fn next_line(&mut self) -> Result<Option<&[u8]>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| Error::io(&self.path, e))?;
            if read == 0 {
                self.finish_block();
                return Ok(None);
            }

            let kind = LineKind::of(&self.buf);
            if kind == LineKind::Vertex {
                if self.block.is_none() {
                    self.block = Some(Xxh3::new());
                    self.vertex_blocks += 1;
                }
                if let Some(hasher) = self.block.as_mut() {
                    hasher.update(&self.buf);
                }
            } else {
                self.finish_block();
            }

            match kind {
                LineKind::Face => {
                    let gid = self.current_group_id();
                    let indices = &mut self.group_indices[gid as usize];
                    for idx in face_position_indices(&self.buf) {
                        indices.insert(idx);
                    }
                    self.prim_groups.push(gid);
                }
                LineKind::Group => {
                    let mut names = tokens(&self.buf).skip(1);
                    // Multi-group declarations pass through untouched.
                    if let (Some(name), None) = (names.next(), names.next()) {
                        let name = String::from_utf8_lossy(name);
                        if name != self.current_group {
                            self.current_group = name.into_owned();
                            self.current_group_id = None;
                        }
                        continue;
                    }
                }
                LineKind::Vertex | LineKind::Other => {}
            }
            return Ok(Some(self.buf.as_slice()));
        }
    }

    /// Stream the whole cleaned file into `out`.
    pub fn clean_into<W: Write>(&mut self, mut out: W) -> Result<()> {
        while let Some(line) = self.next_line()? {
            out.write_all(line).map_err(Error::from)?;
        }
        out.flush().map_err(Error::from)?;
        Ok(())
    }

    pub fn finish(mut self) -> CleanReport {
        self.finish_block();
        CleanReport {
            group_names: self.group_names,
            group_indices: self.group_indices,
            prim_groups: self.prim_groups,
            vertex_blocks: self.vertex_blocks,
            duplicate_blocks: self.duplicate_blocks,
        }
    }

    fn current_group_id(&mut self) -> u32 {
        if let Some(id) = self.current_group_id {
            return id;
        }
        let (index, inserted) = self.group_names.insert_full(self.current_group.clone());
        if inserted {
            self.group_indices.push(HashSet::new());
        }
        let id = index as u32;
        self.current_group_id = Some(id);
        id
    }

    fn finish_block(&mut self) {
        if let Some(hasher) = self.block.take() {
            if !self.seen_blocks.insert(hasher.digest()) {
                self.duplicate_blocks += 1;
            }
        }
    }
}

/// Whitespace-separated tokens of a raw line.
pub(crate) fn tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    line.split(u8::is_ascii_whitespace)
        .filter(|token| !token.is_empty())
}

/// First token of a line (`v`, `f`, `g`, `usemtl`, ...), leading whitespace ignored.
pub(crate) fn line_keyword(line: &[u8]) -> Option<&[u8]> {
    tokens(line).next()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Vertex,
    Face,
    Group,
    Other,
}

impl LineKind {
    fn of(line: &[u8]) -> Self {
        match line_keyword(line) {
            Some(b"v") => LineKind::Vertex,
            Some(b"f") => LineKind::Face,
            Some(b"g") => LineKind::Group,
            _ => LineKind::Other,
        }
    }
}

/// Position indices referenced by a face line: the leading digits of every token after `f`.
fn face_position_indices(line: &[u8]) -> impl Iterator<Item = u32> + '_ {
    tokens(line).skip(1).filter_map(|token| {
        let end = token
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(token.len());
        std::str::from_utf8(&token[..end]).ok()?.parse().ok()
    })
}

/// Metadata gathered while cleaning one stream.
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    group_names: IndexSet<String>,
    group_indices: Vec<HashSet<u32>>,
    prim_groups: Vec<u32>,
    pub vertex_blocks: usize,
    pub duplicate_blocks: usize,
}

impl CleanReport {
    /// Number of face primitives emitted.
    pub fn num_prims(&self) -> usize {
        self.prim_groups.len()
    }

    /// Group owning the `index`-th emitted face.
    pub fn prim_group(&self, index: usize) -> Option<&str> {
        let gid = *self.prim_groups.get(index)?;
        self.group_names.get_index(gid as usize).map(String::as_str)
    }

    /// Groups in order of first face.
    pub fn group_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.group_names.iter().map(String::as_str)
    }

    /// Vertex indices referenced by the faces of each group.
    pub fn group_indices(&self) -> HashMap<&str, &HashSet<u32>> {
        self.group_names
            .iter()
            .map(String::as_str)
            .zip(self.group_indices.iter())
            .collect()
    }

    /// True only when the file is provably two identical halves: at least one duplicated
    /// vertex block and exactly twice as many blocks as duplicates.
    pub fn doubled(&self) -> bool {
        self.duplicate_blocks > 0 && self.vertex_blocks == self.duplicate_blocks * 2
    }

    /// Duplicates were seen but the ratio does not prove doubling.
    pub fn ambiguous_duplicates(&self) -> bool {
        self.duplicate_blocks > 0 && !self.doubled()
    }
}
