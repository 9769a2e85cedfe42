//! Bundled reference dataset with an explicit load-once cache.
//!
//! The sample CSV is read from disk at most once per process; afterwards
//! every caller shares the same read-only [`Dataset`]. Concurrent first
//! access is serialized so only one load actually happens, and a failed
//! load leaves the store empty for a later retry with a corrected file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use polars::prelude::{CsvReader, SerReader};

use crate::error::Result;
use crate::schema::{Dataset, TableSchema};

/// Location of the bundled review dataset, resolved against the process
/// working directory. Callers running from elsewhere should construct a
/// [`SampleStore`] with an absolute path instead.
pub const BUNDLED_PATH: &str = "data/sample_data.csv";

/// Process-scoped cache for one sample dataset file.
pub struct SampleStore {
    path: PathBuf,
    cell: OnceLock<Dataset>,
    init: Mutex<()>,
}

impl SampleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the dataset has been loaded into the cache.
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The cached dataset, loading and validating it on first access.
    pub fn get(&self) -> Result<&Dataset> {
        if let Some(data) = self.cell.get() {
            return Ok(data);
        }
        // One loader at a time; losers of the race see the winner's value.
        let _guard = self.init.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(data) = self.cell.get() {
            return Ok(data);
        }
        let frame = CsvReader::from_path(&self.path)?.finish()?;
        let data = Dataset::from_frame(frame, TableSchema::reference())?;
        Ok(self.cell.get_or_init(|| data))
    }
}

/// The store backing [`BUNDLED_PATH`].
pub fn bundled() -> &'static SampleStore {
    static STORE: OnceLock<SampleStore> = OnceLock::new();
    STORE.get_or_init(|| SampleStore::new(BUNDLED_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "treatment,outcome,verified_purchase,product_category,total_votes,helpful_votes"
        )
        .unwrap();
        writeln!(file, "1,5.0,1,0,10,8").unwrap();
        writeln!(file, "0,3.0,0,1,4,1").unwrap();
        writeln!(file, "1,4.0,1,2,7,5").unwrap();
        writeln!(file, "0,2.0,0,0,2,0").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_once_and_reuses_the_same_value() {
        let file = sample_csv();
        let store = SampleStore::new(file.path());
        assert!(!store.is_loaded());
        let first = store.get().unwrap();
        assert!(store.is_loaded());
        let second = store.get().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.height(), 4);
    }

    #[test]
    fn missing_file_leaves_the_store_empty() {
        let store = SampleStore::new("/nonexistent/sample.csv");
        assert!(store.get().is_err());
        assert!(!store.is_loaded());
    }

    #[test]
    fn concurrent_first_access_loads_exactly_once() {
        let file = sample_csv();
        let store = SampleStore::new(file.path());
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| store.get().is_ok())).collect();
            for h in handles {
                assert!(h.join().unwrap());
            }
        });
        let a = store.get().unwrap();
        let b = store.get().unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
