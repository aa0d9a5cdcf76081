use crate::input::Input;
use rand_core::RngCore;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Corpus is empty, cannot select an input")]
    CorpusIsEmpty,

    #[error("Failed to read seed {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CorpusError {
    fn io(path: &Path, source: io::Error) -> Self {
        CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A set of inputs the runner draws from and mutates.
pub trait Corpus<I: Input> {
    /// Adds `input` unless an identical one is already present.
    ///
    /// Returns the new entry's id, or `None` for a duplicate.
    fn add(&mut self, input: I, origin: String) -> Option<usize>;

    fn get(&self, id: usize) -> Option<&I>;

    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads every file named in `seed_paths`, and every regular file directly
    /// inside each named directory. Returns how many new entries were added.
    fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError>;
}

/// In-memory corpus deduplicated by MD5 digest.
#[derive(Debug)]
pub struct SeedCorpus<I: Input> {
    entries: Vec<(I, String)>,
    digests: HashSet<[u8; 16]>,
}

impl<I: Input> SeedCorpus<I> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            digests: HashSet::new(),
        }
    }

    /// Where the entry came from: a seed path, a mutation, or a crash.
    pub fn origin(&self, id: usize) -> Option<&str> {
        self.entries.get(id).map(|(_, origin)| origin.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &I> {
        self.entries.iter().map(|(input, _)| input)
    }
}

impl<I: Input> Default for SeedCorpus<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Input + From<Vec<u8>>> SeedCorpus<I> {
    fn add_file(&mut self, path: &Path) -> Result<bool, CorpusError> {
        let data = fs::read(path).map_err(|e| CorpusError::io(path, e))?;
        Ok(self
            .add(I::from(data), format!("Seed: {}", path.display()))
            .is_some())
    }
}

impl<I: Input + From<Vec<u8>>> Corpus<I> for SeedCorpus<I> {
    fn add(&mut self, input: I, origin: String) -> Option<usize> {
        let digest = md5::compute(input.as_bytes()).0;
        if !self.digests.insert(digest) {
            debug!(%origin, "skipping duplicate corpus entry");
            return None;
        }
        let id = self.entries.len();
        self.entries.push((input, origin));
        Some(id)
    }

    fn get(&self, id: usize) -> Option<&I> {
        self.entries.get(id).map(|(input, _)| input)
    }

    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.next_u64() as usize % self.entries.len();
        self.entries.get(index).map(|(input, _)| (index, input))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        for path in seed_paths {
            if path.is_file() {
                loaded_count += usize::from(self.add_file(path)?);
            } else if path.is_dir() {
                let mut files = Vec::new();
                for entry in fs::read_dir(path).map_err(|e| CorpusError::io(path, e))? {
                    let entry = entry.map_err(|e| CorpusError::io(path, e))?;
                    let file_path = entry.path();
                    if file_path.is_file() {
                        files.push(file_path);
                    }
                }
                // Sorted so entry ids do not depend on directory order.
                files.sort();
                for file_path in files {
                    loaded_count += usize::from(self.add_file(&file_path)?);
                }
            } else {
                return Err(CorpusError::io(
                    path,
                    io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
                ));
            }
        }
        Ok(loaded_count)
    }
}
