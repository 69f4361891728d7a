//! A registry of source files, mapping file ids to names and content.
//!
//! The checker itself never reads files; the registry exists so that positions
//! ([`crate::position::RawSpan`]) stay small (a [`FileId`] plus byte offsets)
//! while diagnostics can still be rendered against the original source by the
//! surrounding driver.
use std::{ops::Range, rc::Rc};

use codespan::ByteIndex;
use codespan_reporting::files::Error;

#[derive(Copy, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u32);

#[derive(Debug, Clone)]
pub struct File {
    /// The name of the file.
    name: String,
    /// The source code of the file.
    source: Rc<str>,
    /// The starting byte indices of each line in the source code.
    line_starts: Rc<[ByteIndex]>,
}

impl File {
    pub fn new(name: impl Into<String>, source: impl Into<Rc<str>>) -> Self {
        let source = source.into();
        let line_starts: Vec<_> = std::iter::once(ByteIndex(0))
            .chain(
                source
                    .match_indices('\n')
                    .map(|(i, _)| ByteIndex(i as u32 + 1)),
            )
            .collect();

        File {
            name: name.into(),
            line_starts: line_starts.into(),
            source,
        }
    }

    fn line_index(&self, byte_index: ByteIndex) -> usize {
        match self.line_starts.binary_search(&byte_index) {
            Ok(line) => line,
            // unwrap(): `line_starts` always starts with a zero, so `next_line`
            // must be at least 1.
            Err(next_line) => next_line.checked_sub(1).unwrap(),
        }
    }
}

/// The collection of source files known to the checker.
#[derive(Debug, Clone, Default)]
pub struct Files {
    files: Vec<File>,
}

impl Files {
    pub fn new() -> Self {
        Files::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<Rc<str>>) -> FileId {
        let file_id = FileId(self.files.len() as u32);
        self.files.push(File::new(name, source));
        file_id
    }

    pub fn get(&self, file_id: FileId) -> Option<&File> {
        self.files.get(file_id.0 as usize)
    }

    fn try_get(&self, file_id: FileId) -> Result<&File, Error> {
        self.get(file_id).ok_or(Error::FileMissing)
    }

    pub fn name(&self, file_id: FileId) -> Option<&str> {
        self.get(file_id).map(|file| file.name.as_str())
    }

    pub fn source(&self, file_id: FileId) -> Option<&str> {
        self.get(file_id).map(|file| &*file.source)
    }
}

impl<'a> codespan_reporting::files::Files<'a> for Files {
    type FileId = FileId;
    type Name = &'a str;
    type Source = &'a str;

    fn name(&'a self, id: FileId) -> Result<&'a str, Error> {
        Ok(self.try_get(id)?.name.as_str())
    }

    fn source(&'a self, id: FileId) -> Result<&'a str, Error> {
        Ok(&self.try_get(id)?.source)
    }

    fn line_index(&'a self, id: FileId, byte_index: usize) -> Result<usize, Error> {
        let idx = ByteIndex(u32::try_from(byte_index).unwrap_or(u32::MAX));
        Ok(self.try_get(id)?.line_index(idx))
    }

    fn line_range(&'a self, id: FileId, line_index: usize) -> Result<Range<usize>, Error> {
        let file = self.try_get(id)?;
        let start = file
            .line_starts
            .get(line_index)
            .ok_or(Error::LineTooLarge {
                given: line_index,
                max: file.line_starts.len() - 1,
            })?
            .0 as usize;
        let end = file
            .line_starts
            .get(line_index + 1)
            .map(|idx| idx.0 as usize)
            .unwrap_or(file.source.len());
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codespan_reporting::files::Files as _;

    #[test]
    fn line_indexing() {
        let mut files = Files::new();
        let id = files.add("test.tern", "one\ntwo\nthree");
        assert_eq!(files.line_index(id, 0).unwrap(), 0);
        assert_eq!(files.line_index(id, 4).unwrap(), 1);
        assert_eq!(files.line_index(id, 8).unwrap(), 2);
        assert_eq!(files.line_range(id, 1).unwrap(), 4..8);
        assert_eq!(files.line_range(id, 2).unwrap(), 8..13);
    }
}
