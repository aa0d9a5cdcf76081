use crate::error::HarnessError;
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How the decoder turns the fuzz buffer into a readable stream.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InputBacking {
    /// Read straight from the borrowed buffer.
    #[default]
    InMemory,
    /// Copy the buffer into an unlinked temporary file and read it back.
    TempFile,
}

/// Splits a raw fuzz buffer into newline-delimited records.
#[derive(Debug, Clone, Default)]
pub struct InputDecoder {
    backing: InputBacking,
    temp_dir: Option<PathBuf>,
}

impl InputDecoder {
    pub fn new(backing: InputBacking) -> Self {
        Self {
            backing,
            temp_dir: None,
        }
    }

    /// Creates temp-file backings under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn backing(&self) -> InputBacking {
        self.backing
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }

    /// Opens `data` as a stream and returns its records.
    ///
    /// An error here means the iteration should be abandoned without
    /// classifying anything.
    pub fn decode<'a>(&self, data: &'a [u8]) -> Result<Lines<Box<dyn BufRead + 'a>>, HarnessError> {
        let reader: Box<dyn BufRead + 'a> = match self.backing {
            InputBacking::InMemory => Box::new(Cursor::new(data)),
            InputBacking::TempFile => Box::new(open_temp_file(data, self.temp_dir())?),
        };
        Ok(Lines::new(reader))
    }
}

fn open_temp_file(data: &[u8], dir: Option<&Path>) -> io::Result<BufReader<std::fs::File>> {
    // Already unlinked on platforms that allow it.
    let mut file = match dir {
        Some(dir) => tempfile::tempfile_in(dir)?,
        None => tempfile::tempfile()?,
    };
    file.write_all(data)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(BufReader::new(file))
}

/// Lazy, single-pass sequence of records with the `\n` delimiter stripped.
///
/// The final record is yielded even when it has no trailing delimiter. A read
/// error ends the sequence.
pub struct Lines<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> Lines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.finished {
            return None;
        }
        let mut record = Vec::new();
        match self.reader.read_until(b'\n', &mut record) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(_) => {
                if record.last() == Some(&b'\n') {
                    record.pop();
                }
                Some(record)
            }
            Err(e) => {
                debug!(error = %e, "input stream read failed, treating as end of input");
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(backing: InputBacking, data: &[u8]) -> Vec<Vec<u8>> {
        InputDecoder::new(backing).decode(data).unwrap().collect()
    }

    #[test]
    fn splits_on_newline_and_strips_delimiter() {
        let records = collect(InputBacking::InMemory, b"user=alice\nuid=1000\n");
        assert_eq!(records, vec![b"user=alice".to_vec(), b"uid=1000".to_vec()]);
    }

    #[test]
    fn truncated_final_record_is_still_yielded() {
        let records = collect(InputBacking::InMemory, b"argv=/bin/ls\nenv=FO");
        assert_eq!(records, vec![b"argv=/bin/ls".to_vec(), b"env=FO".to_vec()]);
    }

    #[test]
    fn keeps_blank_records_and_carriage_returns() {
        let records = collect(InputBacking::InMemory, b"\n\r\n#x");
        assert_eq!(records, vec![b"".to_vec(), b"\r".to_vec(), b"#x".to_vec()]);
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        assert!(collect(InputBacking::InMemory, b"").is_empty());
    }

    #[test]
    fn temp_file_backing_matches_in_memory() {
        let data = b"sudoers_file=/etc/sudoers\nhost=example.org\nlast";
        assert_eq!(
            collect(InputBacking::TempFile, data),
            collect(InputBacking::InMemory, data)
        );
    }

    #[test]
    fn temp_file_in_chosen_directory() {
        let dir = tempfile::tempdir().unwrap();
        let decoder =
            InputDecoder::new(InputBacking::TempFile).with_temp_dir(Some(dir.path().into()));
        let records: Vec<_> = decoder.decode(b"uid=0\nuser=root").unwrap().collect();
        assert_eq!(records, vec![b"uid=0".to_vec(), b"user=root".to_vec()]);
    }

    #[test]
    fn missing_temp_dir_fails_to_open() {
        let decoder = InputDecoder::new(InputBacking::TempFile)
            .with_temp_dir(Some(PathBuf::from("/nonexistent/policy-harness")));
        assert!(matches!(
            decoder.decode(b"user=root\n"),
            Err(HarnessError::OpenInput(_))
        ));

        // The in-memory backing never touches the directory.
        let in_memory = InputDecoder::new(InputBacking::InMemory)
            .with_temp_dir(Some(PathBuf::from("/nonexistent/policy-harness")));
        assert!(in_memory.decode(b"user=root\n").is_ok());
    }

    struct FailingReader;

    impl io::Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("boom"))
        }
    }

    #[test]
    fn read_error_ends_the_sequence() {
        let mut lines = Lines::new(BufReader::new(FailingReader));
        assert!(lines.next().is_none());
        assert!(lines.next().is_none());
    }
}
