//! Directory-backed `.mfc` feature store

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use cf_core::FeatureMatrix;
use log::{debug, warn};

use crate::{FileError, FileResult};

/// File extension for stored feature matrices
pub const MFC_EXTENSION: &str = "mfc";

/// Header size in bytes: two u32 counts
const HEADER_LEN: u64 = 8;

/// Loads and saves MFCC feature matrices under a root directory.
///
/// Ids map to `<root>/<id>.mfc`; ids containing path separators or parent
/// references are rejected rather than resolved.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    root: PathBuf,
}

impl FeatureStore {
    /// Create a store rooted at `root`. The directory is created lazily
    /// on the first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a call id resolves to
    pub fn path_for(&self, id: &str) -> FileResult<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.{MFC_EXTENSION}")))
    }

    /// True if a feature file exists for the id
    pub fn contains(&self, id: &str) -> bool {
        self.path_for(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Write a feature matrix.
    ///
    /// Fails with `InvalidMatrix` for empty matrices; the on-disk header
    /// requires both counts to be positive.
    pub fn save(&self, id: &str, matrix: &FeatureMatrix) -> FileResult<()> {
        let path = self.path_for(id)?;
        if matrix.num_frames() == 0 || matrix.num_coeffs() == 0 {
            return Err(FileError::InvalidMatrix(format!(
                "{} frames x {} coefficients",
                matrix.num_frames(),
                matrix.num_coeffs()
            )));
        }
        let num_frames = u32::try_from(matrix.num_frames())
            .map_err(|_| FileError::InvalidMatrix("frame count exceeds u32".into()))?;
        let num_coeffs = u32::try_from(matrix.num_coeffs())
            .map_err(|_| FileError::InvalidMatrix("coefficient count exceeds u32".into()))?;

        std::fs::create_dir_all(&self.root)?;
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&num_frames.to_le_bytes())?;
        writer.write_all(&num_coeffs.to_le_bytes())?;
        for &value in matrix.as_slice() {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;

        debug!(
            "saved master features '{id}': {num_frames} frames x {num_coeffs} coeffs"
        );
        Ok(())
    }

    /// Load a feature matrix.
    ///
    /// Fails with `NotFound` if no file exists and `Malformed` if the
    /// header is inconsistent or the file length is not exactly
    /// `8 + num_frames * num_coeffs * 4`.
    pub fn load(&self, id: &str) -> FileResult<FeatureMatrix> {
        let path = self.path_for(id)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|_| malformed(id, "truncated header"))?;
        let num_frames = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let num_coeffs = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

        if num_frames == 0 || num_coeffs == 0 {
            warn!("feature file '{id}' has zero counts in header");
            return Err(malformed(
                id,
                &format!("zero counts: {num_frames} frames x {num_coeffs} coeffs"),
            ));
        }
        let expected_len = HEADER_LEN + (num_frames * num_coeffs * 4) as u64;
        if file_len != expected_len {
            return Err(malformed(
                id,
                &format!("length {file_len}, expected {expected_len}"),
            ));
        }

        let mut data = Vec::with_capacity(num_frames * num_coeffs);
        let mut buf = [0u8; 4];
        for _ in 0..num_frames * num_coeffs {
            reader
                .read_exact(&mut buf)
                .map_err(|_| malformed(id, "truncated payload"))?;
            data.push(f32::from_le_bytes(buf));
        }

        let matrix = FeatureMatrix::from_raw(num_coeffs, data)
            .map_err(|e| malformed(id, &e.to_string()))?;
        debug!(
            "loaded master features '{id}': {} frames x {} coeffs",
            matrix.num_frames(),
            matrix.num_coeffs()
        );
        Ok(matrix)
    }
}

fn malformed(id: &str, reason: &str) -> FileError {
    FileError::Malformed {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_id(id: &str) -> FileResult<()> {
    let ok = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(FileError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn sample_matrix(frames: usize, coeffs: usize) -> FeatureMatrix {
        let mut m = FeatureMatrix::new(coeffs);
        let mut row = vec![0.0f32; coeffs];
        for f in 0..frames {
            for (c, v) in row.iter_mut().enumerate() {
                *v = f as f32 * 0.5 + c as f32 * 0.25 - 3.0;
            }
            m.push_row(&row).unwrap();
        }
        m
    }

    #[test]
    fn test_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let matrix = sample_matrix(40, 13);

        store.save("buck_grunt", &matrix).unwrap();
        let loaded = store.load("buck_grunt").unwrap();
        assert_eq!(matrix, loaded);
    }

    #[test]
    fn test_missing_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        assert!(matches!(
            store.load("nope"),
            Err(FileError::NotFound(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_zero_count_header_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let path = dir.path().join("bad.mfc");
        let mut f = File::create(&path).unwrap();
        f.write_all(&0u32.to_le_bytes()).unwrap();
        f.write_all(&13u32.to_le_bytes()).unwrap();

        assert!(matches!(store.load("bad"), Err(FileError::Malformed { .. })));
    }

    #[test]
    fn test_wrong_length_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let path = dir.path().join("short.mfc");
        let mut f = File::create(&path).unwrap();
        f.write_all(&4u32.to_le_bytes()).unwrap();
        f.write_all(&13u32.to_le_bytes()).unwrap();
        // Payload holds 3 frames instead of the promised 4
        f.write_all(&vec![0u8; 3 * 13 * 4]).unwrap();

        assert!(matches!(store.load("short"), Err(FileError::Malformed { .. })));
    }

    #[test]
    fn test_empty_matrix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        assert!(matches!(
            store.save("empty", &FeatureMatrix::new(13)),
            Err(FileError::InvalidMatrix(_))
        ));
    }

    #[test]
    fn test_path_escapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                store.load(id),
                Err(FileError::InvalidId(_))
            ), "id {id:?} should be rejected");
        }
    }

    #[test]
    fn test_contains_tracks_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        assert!(!store.contains("call"));
        store.save("call", &sample_matrix(3, 4)).unwrap();
        assert!(store.contains("call"));
    }
}
