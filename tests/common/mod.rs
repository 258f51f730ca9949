#![allow(dead_code)]

use kvdir::backend::column::{ColumnBackend, MemColumnSession, Tables};
use kvdir::backend::hash::{HashBackend, MemHashClient};
use kvdir::config::ConsistencyConfig;
use kvdir::utils::{DEFAULT_METADATA_KEY, DEFAULT_TABLE_FILEDATA, DEFAULT_TABLE_METADATA};
use kvdir::{Directory, IndexWriter, Result};
use std::sync::{Arc, Mutex};

pub fn hash_backend() -> Arc<HashBackend<MemHashClient>> {
    Arc::new(HashBackend::new(MemHashClient::new(), DEFAULT_METADATA_KEY))
}

pub fn column_backend() -> Arc<ColumnBackend<MemColumnSession>> {
    let tables = Tables::new(Some("search"), DEFAULT_TABLE_METADATA, DEFAULT_TABLE_FILEDATA);
    Arc::new(ColumnBackend::new(
        MemColumnSession::new(),
        tables,
        ConsistencyConfig::default(),
    ))
}

/// one directory per backend binding
pub fn directories(block_size: usize) -> Vec<(&'static str, Directory)> {
    vec![
        ("hash", Directory::new(hash_backend(), block_size)),
        ("column", Directory::new(column_backend(), block_size)),
    ]
}

pub fn pattern(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn write_file(dir: &Directory, name: &str, data: &[u8]) -> Result<()> {
    let mut out = dir.create_output(name)?;
    out.write_bytes(data)?;
    out.close()
}

pub fn read_file(dir: &Directory, name: &str) -> Result<Vec<u8>> {
    let mut input = dir.open_input(name)?;
    let mut buf = vec![0u8; input.length() as usize];
    input.read_bytes(&mut buf)?;
    Ok(buf)
}

#[derive(Default)]
struct EngineState {
    /// documents not yet in a segment
    buffered: Vec<String>,
    segments: Vec<String>,
    next_segment: u64,
    generation: u64,
    commits: u64,
}

/// A tiny segment-based engine that keeps everything in the directory. Buffered documents
/// become a segment file when a snapshot is opened or the writer commits, a commit also
/// rewrites the `segments` file through a temp file and a rename.
pub struct SegmentWriter {
    dir: Directory,
    state: Mutex<EngineState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub docs: Vec<String>,
}

impl SegmentWriter {
    pub fn open(dir: Directory) -> Result<Self> {
        let mut state = EngineState::default();
        if dir.file_exists("segments")? {
            let data = read_file(&dir, "segments")?;
            state.segments = String::from_utf8_lossy(&data)
                .lines()
                .map(|s| s.to_string())
                .collect();
            state.next_segment = state.segments.len() as u64;
        }
        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    pub fn add_documents(&self, docs: &[&str]) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.buffered.extend(docs.iter().map(|d| d.to_string()));
        Ok(())
    }

    pub fn delete_all(&self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        for seg in s.segments.drain(..) {
            self.dir.delete_file(&seg)?;
        }
        s.buffered.clear();
        s.generation += 1;
        Ok(())
    }

    pub fn commits(&self) -> u64 {
        self.state.lock().unwrap().commits
    }

    fn flush(&self, s: &mut EngineState) -> Result<()> {
        if s.buffered.is_empty() {
            return Ok(());
        }
        let name = format!("_{}.seg", s.next_segment);
        write_file(&self.dir, &name, s.buffered.join("\n").as_bytes())?;
        s.next_segment += 1;
        s.segments.push(name);
        s.buffered.clear();
        s.generation += 1;
        Ok(())
    }

    fn read_snapshot(&self, s: &EngineState) -> Result<Snapshot> {
        let mut docs = Vec::new();
        for seg in &s.segments {
            let data = read_file(&self.dir, seg)?;
            docs.extend(String::from_utf8_lossy(&data).lines().map(|l| l.to_string()));
        }
        Ok(Snapshot {
            generation: s.generation,
            docs,
        })
    }
}

impl IndexWriter for SegmentWriter {
    type Snapshot = Snapshot;

    fn commit(&self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        self.flush(&mut s)?;
        let mut out = self.dir.create_temp_output("segments", "", "commit")?;
        let tmp = out.name().to_string();
        out.write_bytes(s.segments.join("\n").as_bytes())?;
        out.close()?;
        self.dir.rename(&tmp, "segments")?;
        s.commits += 1;
        Ok(())
    }

    fn open_snapshot(&self) -> Result<Snapshot> {
        let mut s = self.state.lock().unwrap();
        self.flush(&mut s)?;
        self.read_snapshot(&s)
    }

    fn reopen_if_changed(&self, current: &Snapshot) -> Result<Option<Snapshot>> {
        let mut s = self.state.lock().unwrap();
        self.flush(&mut s)?;
        if s.generation == current.generation {
            return Ok(None);
        }
        self.read_snapshot(&s).map(Some)
    }

    fn close(&self) -> Result<()> {
        self.commit()
    }
}
