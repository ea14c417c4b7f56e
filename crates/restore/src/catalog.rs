use std::{
    fs::File,
    io::{
        BufRead,
        BufReader,
    },
    path::Path,
};

use anyhow::Context as _;
use serde::{
    Deserialize,
    Serialize,
};

/// One captured SQL unit of work plus the metadata batching needs: the kind
/// of object it creates (`"INDEX"`, `"COMMENT METADATA"`, ...) and the
/// logical object it depends on, e.g. the table an index belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    pub schema: String,
    pub name: String,
    pub object_type: String,
    #[serde(default)]
    pub reference_object: String,
}

impl Statement {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// A statement destined for a pre-allocated plan file. `offset` is the exact
/// byte position its text must land at; offsets are assigned when the catalog
/// is captured and never overlap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetStatement {
    #[serde(flatten)]
    pub statement: Statement,
    pub offset: u64,
}

pub fn read_statements(path: &Path) -> anyhow::Result<Vec<Statement>> {
    read_catalog(path)
}

pub fn read_offset_statements(path: &Path) -> anyhow::Result<Vec<OffsetStatement>> {
    read_catalog(path)
}

/// Catalogs are newline-delimited JSON, one record per line. Blank lines are
/// tolerated so hand-edited catalogs stay loadable.
fn read_catalog<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening catalog {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading catalog {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("catalog {} line {}", path.display(), i + 1))?;
        records.push(record);
    }
    Ok(records)
}
