//! Content hashing for figure sources
//!
//! The hash must be stable across runs and processes, so it is built with
//! blake3 over length-prefixed fields rather than `std::hash`.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

const DOMAIN: &str = "manutex-figure-v1";

const DATA_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "json", "txt", "dat", "xlsx", "parquet", "npy", "npz", "h5",
];

lazy_static! {
    static ref QUOTED_RE: Regex = Regex::new(r#"["']([^"'\n]+)["']"#).unwrap();
}

/// Deterministic hasher with a builder interface.
pub struct ContentHasher {
    inner: blake3::Hasher,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Add a length-prefixed field.
    pub fn field(mut self, data: &[u8]) -> Self {
        self.inner.update(&(data.len() as u64).to_le_bytes());
        self.inner.update(data);
        self
    }

    pub fn field_str(self, s: &str) -> Self {
        self.field(s.as_bytes())
    }

    pub fn field_u64(self, v: u64) -> Self {
        self.field(&v.to_le_bytes())
    }

    /// First 128 bits of the digest, as 32 lowercase hex characters.
    pub fn finish_hex(self) -> String {
        let hash = self.inner.finalize();
        hash.as_bytes()[..16]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a figure's output depends on.
pub struct FigureInputs<'a> {
    /// Source path as written in the manuscript (`FIGURES/plot.py`).
    pub relative_path: &'a str,
    pub source: &'a [u8],
    /// `(path, bytes)` of referenced data files, sorted by path.
    pub data_files: &'a [(String, Vec<u8>)],
    pub format: &'a str,
    pub dpi: u32,
    /// Generator command template, without per-run paths.
    pub command: &'a str,
}

pub fn figure_hash(inputs: &FigureInputs<'_>) -> String {
    let mut hasher = ContentHasher::new()
        .field_str(DOMAIN)
        .field_str(inputs.relative_path)
        .field(inputs.source)
        .field_u64(inputs.data_files.len() as u64);
    for (path, bytes) in inputs.data_files {
        hasher = hasher.field_str(path).field(bytes);
    }
    hasher
        .field_str(inputs.format)
        .field_u64(inputs.dpi as u64)
        .field_str(inputs.command)
        .finish_hex()
}

/// Data files a script refers to through quoted literals, resolved against
/// the script's directory. Only existing files with a data extension count.
/// Sorted, without duplicates.
pub fn referenced_data_files(script: &str, script_dir: &Path) -> Vec<String> {
    let mut found: Vec<String> = QUOTED_RE
        .captures_iter(script)
        .map(|caps| caps[1].to_string())
        .filter(|literal| {
            let ext = Path::new(literal)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            ext.map(|e| DATA_EXTENSIONS.contains(&e.as_str()))
                .unwrap_or(false)
        })
        .filter(|literal| script_dir.join(literal).is_file())
        .collect();
    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn inputs<'a>(source: &'a [u8], data: &'a [(String, Vec<u8>)]) -> FigureInputs<'a> {
        FigureInputs {
            relative_path: "FIGURES/plot.py",
            source,
            data_files: data,
            format: "pdf",
            dpi: 300,
            command: "python3 {source}",
        }
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = figure_hash(&inputs(b"print(1)", &[]));
        assert_eq!(a, figure_hash(&inputs(b"print(1)", &[])));
        assert_eq!(a.len(), 32);
        assert_ne!(a, figure_hash(&inputs(b"print(2)", &[])));

        let data = vec![("d.csv".to_string(), b"1,2".to_vec())];
        assert_ne!(a, figure_hash(&inputs(b"print(1)", &data)));

        let mut other = inputs(b"print(1)", &[]);
        other.dpi = 150;
        assert_ne!(a, figure_hash(&other));
    }

    #[test]
    fn fields_are_length_prefixed() {
        let x = ContentHasher::new().field_str("ab").field_str("c").finish_hex();
        let y = ContentHasher::new().field_str("a").field_str("bc").finish_hex();
        assert_ne!(x, y);
    }

    #[test]
    fn finds_existing_data_literals() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "1").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        let script = "x = read('b.csv')\ny = load(\"a.json\")\nz = 'missing.csv'\nw = 'title.png'\nv = 'b.csv'";
        assert_eq!(
            referenced_data_files(script, dir.path()),
            vec!["a.json".to_string(), "b.csv".to_string()]
        );
    }
}
