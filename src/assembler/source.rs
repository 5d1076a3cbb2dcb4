use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Index into the stream's file table.
pub type FileId = usize;

/// A position in the source text, orderable by (file, line, column).
///
/// Lines are 1-based, columns are 0-based byte offsets into the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SourcePos {
    pub file: FileId,
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub fn new(file: FileId, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column + 1)
    }
}

/// One logical line of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub file: FileId,
    pub number: usize,
    pub text: String,
}

/// An error raised while tokenizing, parsing or assembling a statement.
///
/// A fatal error aborts the current pass and suppresses the emission pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SourceError {
    pub pos: SourcePos,
    pub message: String,
    pub fatal: bool,
}

impl SourceError {
    pub fn new(pos: SourcePos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(pos: SourcePos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
            fatal: true,
        }
    }
}

/// An input or output failure, bearing the path it happened on.
#[derive(Debug, Error)]
#[error("{path}: {source}")]
pub struct SystemError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum IncludeError {
    #[error(transparent)]
    System(#[from] SystemError),
    #[error("File '{0}' is already included")]
    Duplicate(String),
}

struct FileInfo {
    path: PathBuf,
    short_name: String,
    lines: Vec<String>,
}

struct Frame {
    file: FileId,
    line_number: usize,
    reader: Box<dyn BufRead>,
}

/// Enumerates logical lines from a stack of open source files.
///
/// `include_file` pushes a new frame; frames are popped when exhausted, so
/// lines keep flowing from the including file after an include ends. The
/// stream archives every line it hands out so diagnostics can quote them
/// later.
pub struct SourceStream {
    files: Vec<FileInfo>,
    frames: Vec<Frame>,
    history: HashSet<PathBuf>,
}

impl fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("files", &self.files.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl Default for SourceStream {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceStream {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            frames: Vec::new(),
            history: HashSet::new(),
        }
    }

    /// Opens a file and pushes it onto the include stack.
    ///
    /// A path that has already been part of this stream is rejected; include
    /// graphs must be acyclic and each file may be pulled in only once.
    #[tracing::instrument]
    pub fn include_file(&mut self, path: &Path) -> Result<(), IncludeError> {
        let normalized = normalize_path(path);
        if !self.history.insert(normalized.clone()) {
            return Err(IncludeError::Duplicate(normalized.display().to_string()));
        }
        let file = File::open(&normalized).map_err(|source| SystemError {
            path: normalized.display().to_string(),
            source,
        })?;
        let file_id = self.add_file(normalized);
        self.frames.push(Frame {
            file: file_id,
            line_number: 0,
            reader: Box::new(BufReader::new(file)),
        });
        Ok(())
    }

    /// Includes a file named relative to the directory of another file.
    #[tracing::instrument]
    pub fn include_relative(&mut self, name: &str, from: FileId) -> Result<(), IncludeError> {
        let base = self.files[from]
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.include_file(&base.join(name))
    }

    /// Pushes an in-memory source, used by tests and embedded callers.
    pub fn include_text(&mut self, name: &str, text: &str) -> FileId {
        let file_id = self.add_file(PathBuf::from(name));
        self.frames.push(Frame {
            file: file_id,
            line_number: 0,
            reader: Box::new(Cursor::new(text.as_bytes().to_vec())),
        });
        file_id
    }

    /// Returns the next logical line, popping exhausted frames.
    pub fn next_line(&mut self) -> Result<Option<Line>, SystemError> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(None);
            };
            let file = frame.file;
            let mut text = String::new();
            match frame.reader.read_line(&mut text) {
                Ok(0) => {
                    self.frames.pop();
                }
                Ok(_) => {
                    while text.ends_with('\n') || text.ends_with('\r') {
                        text.pop();
                    }
                    frame.line_number += 1;
                    let number = frame.line_number;
                    self.files[file].lines.push(text.clone());
                    return Ok(Some(Line { file, number, text }));
                }
                Err(source) => {
                    self.frames.pop();
                    return Err(SystemError {
                        path: self.files[file].path.display().to_string(),
                        source,
                    });
                }
            }
        }
    }

    pub fn filename(&self, file: FileId) -> String {
        self.files[file].path.display().to_string()
    }

    pub fn short_filename(&self, file: FileId) -> &str {
        &self.files[file].short_name
    }

    /// The archived text of a line previously returned by `next_line`.
    pub fn line_text(&self, file: FileId, number: usize) -> Option<&str> {
        let index = number.checked_sub(1)?;
        self.files[file].lines.get(index).map(String::as_str)
    }

    pub fn widest_short_filename(&self) -> usize {
        self.files
            .iter()
            .map(|file| file.short_name.len())
            .max()
            .unwrap_or(0)
    }

    fn add_file(&mut self, path: PathBuf) -> FileId {
        let short_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.files.push(FileInfo {
            path,
            short_name,
            lines: Vec::new(),
        });
        self.files.len() - 1
    }
}

/// Collapses `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) => {}
                _ => result.push(".."),
            },
            other => result.push(other),
        }
    }
    if result.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_path() {
        let tests = vec![
            ("foo/bar", "foo/bar"),
            ("foo/./bar", "foo/bar"),
            ("foo/../bar", "bar"),
            ("./foo", "foo"),
            ("../foo", "../foo"),
            ("foo/bar/../../baz", "baz"),
            ("/foo/../bar", "/bar"),
            ("/..", "/"),
            (".", "."),
        ];
        for (input, expected) in tests {
            assert_eq!(normalize_path(Path::new(input)), PathBuf::from(expected));
        }
    }

    #[test]
    fn test_text_lines() {
        let mut stream = SourceStream::new();
        stream.include_text("main.asm", "lda #$01\nrts\n");
        let line = stream.next_line().unwrap().unwrap();
        assert_eq!(line.number, 1);
        assert_eq!(line.text, "lda #$01");
        let line = stream.next_line().unwrap().unwrap();
        assert_eq!(line.number, 2);
        assert_eq!(line.text, "rts");
        assert!(stream.next_line().unwrap().is_none());
        assert_eq!(stream.line_text(0, 2), Some("rts"));
    }

    #[test]
    fn test_nested_text_sources() {
        // An include in the middle of a file resumes the outer file after
        // the inner one runs dry.
        let mut stream = SourceStream::new();
        stream.include_text("outer.asm", "one\ntwo\n");
        assert_eq!(stream.next_line().unwrap().unwrap().text, "one");
        let inner = stream.include_text("inner.asm", "inside\n");
        let line = stream.next_line().unwrap().unwrap();
        assert_eq!(line.file, inner);
        assert_eq!(line.text, "inside");
        let line = stream.next_line().unwrap().unwrap();
        assert_eq!(line.text, "two");
        assert!(stream.next_line().unwrap().is_none());
    }

    #[test]
    fn test_duplicate_include_rejected() {
        let mut stream = SourceStream::new();
        stream.history.insert(PathBuf::from("lib.asm"));
        let result = stream.include_file(Path::new("./lib.asm"));
        assert!(matches!(result, Err(IncludeError::Duplicate(_))));
    }

    #[test]
    fn test_missing_file_is_a_system_error() {
        let mut stream = SourceStream::new();
        let result = stream.include_file(Path::new("does-not-exist.asm"));
        assert!(matches!(result, Err(IncludeError::System(_))));
    }

    #[test]
    fn test_short_filenames() {
        let mut stream = SourceStream::new();
        stream.include_text("some/dir/main.asm", "");
        assert_eq!(stream.short_filename(0), "main.asm");
        assert_eq!(stream.filename(0), "some/dir/main.asm");
    }

    #[test]
    fn test_source_pos_ordering() {
        let a = SourcePos::new(0, 1, 0);
        let b = SourcePos::new(0, 1, 4);
        let c = SourcePos::new(0, 2, 0);
        let d = SourcePos::new(1, 1, 0);
        assert!(a < b && b < c && c < d);
    }
}
