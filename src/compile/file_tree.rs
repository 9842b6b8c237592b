use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

/// Index of a source within a `SourceRegistry`
pub type FileId = usize;

/// One `(uri, sourceText)` pair, plus a line index used to turn byte offsets
/// into line/column pairs for spans and error context
#[derive(Clone, Debug)]
pub struct SourceFile {
    id: FileId,
    uri: String,
    contents: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(id: FileId, uri: String, contents: String) -> SourceFile {
        let line_starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        SourceFile {
            id,
            uri,
            contents,
            line_starts,
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// 1-based line and column of a byte offset
    pub fn location(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(l) => l,
            Err(l) => l - 1,
        };

        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// The text of a 1-based line, without its newline
    pub fn line(&self, line: usize) -> Option<&str> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .map(|e| e - 1)
            .unwrap_or(self.contents.len());

        self.contents
            .get(start..end)
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
    }
}

/// The ordered list of sources one compilation works over.
///
/// Order matters: templates are merged and top-level statements are run in
/// the order their files were registered.
#[derive(Default, Debug, Clone)]
pub struct SourceRegistry {
    files: Vec<SourceFile>,
}

impl SourceRegistry {
    pub fn new() -> SourceRegistry {
        SourceRegistry::default()
    }

    pub fn add(&mut self, uri: impl Into<String>, contents: impl Into<String>) -> FileId {
        let id = self.files.len();
        self.files
            .push(SourceFile::new(id, uri.into(), contents.into()));

        id
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id)
    }

    pub fn uri(&self, id: FileId) -> &str {
        self.files
            .get(id)
            .map(|f| f.uri())
            .unwrap_or("<builtin>")
    }

    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Files whose name starts with `_` are kept in a project but never compiled
pub fn is_compiled(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| !n.starts_with('_'))
        .unwrap_or(false)
}

/// Expands files and directories into the ordered list of sources to compile.
///
/// Directories are walked breadth first with entries sorted by name, so the
/// same tree always yields the same order. Only `.tt` files are picked up from
/// directories; files named directly are taken as given.
pub fn expand_paths(paths: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut queue: VecDeque<(PathBuf, bool)> = paths.iter().map(|p| (p.clone(), true)).collect();
    let mut out = Vec::new();

    while let Some((p, named)) = queue.pop_front() {
        if p.is_dir() {
            let mut entries = p
                .read_dir()?
                .map(|e| e.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.sort();

            queue.extend(entries.into_iter().map(|e| (e, false)));
        } else if !is_compiled(&p) {
            continue;
        } else if named || p.extension().map(|e| e == "tt").unwrap_or(false) {
            out.push(p);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_are_one_based() {
        let mut reg = SourceRegistry::new();
        let id = reg.add("a.tt", "fn main() {\n  foo();\n}\n");
        let f = reg.get(id).unwrap();

        assert_eq!(f.location(0), (1, 1));
        assert_eq!(f.location(14), (2, 3));
        assert_eq!(f.line(2), Some("  foo();"));
        assert_eq!(f.line(3), Some("}"));
        assert_eq!(f.line(0), None);
    }

    #[test]
    fn underscore_files_are_skipped() {
        assert!(is_compiled(Path::new("src/main.tt")));
        assert!(!is_compiled(Path::new("src/_scratch.tt")));
    }
}
