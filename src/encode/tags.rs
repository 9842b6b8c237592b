use std::collections::HashMap;

/// The side table that maps statement tags back to source locations.
///
/// A tag is the index of a `"function@uri@line"` entry. The generated code
/// pushes tags onto `$rt.stack` around each statement so the runtime can print
/// a trace in terms of the original source.
#[derive(Clone, Debug, Default)]
pub struct TagTable {
    entries: Vec<String>,
    index: HashMap<String, usize>,
}

impl TagTable {
    pub fn new() -> TagTable {
        TagTable::default()
    }

    /// The tag for a location, allocating one on first use
    pub fn tag(&mut self, function: &str, uri: &str, line: usize) -> usize {
        let entry = format!("{function}@{uri}@{line}");

        if let Some(&t) = self.index.get(&entry) {
            return t;
        }

        let t = self.entries.len();
        self.index.insert(entry.clone(), t);
        self.entries.push(entry);
        t
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// The table as a JSON array of strings
    pub fn to_json(&self) -> String {
        serde_json::Value::from(self.entries.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_deduplicated_in_first_use_order() {
        let mut t = TagTable::new();

        assert_eq!(t.tag("main", "main.tt", 3), 0);
        assert_eq!(t.tag("id", "main.tt", 1), 1);
        assert_eq!(t.tag("main", "main.tt", 3), 0);
        assert_eq!(t.len(), 2);
        assert_eq!(t.to_json(), r#"["main@main.tt@3","id@main.tt@1"]"#);
    }
}
