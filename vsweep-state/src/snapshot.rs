//! Gzip snapshots of the retention store.
//!
//! The snapshot is the store's durable form: a gzip-wrapped copy of the
//! database produced through the SQLite backup API, so it is consistent
//! even while the connection stays open.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::backup::Backup;
use rusqlite::Connection;

use crate::error::StoreError;
use crate::store::Store;

/// Pages copied per backup step. The database is small; large steps keep
/// the connection lock short-lived anyway.
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 256;

impl Store {
    /// Writes a gzip-compressed snapshot of the database to `w`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backup or the compressed write fails.
    pub fn snapshot_to(&self, w: &mut dyn Write) -> Result<(), StoreError> {
        let scratch = tempfile::NamedTempFile::new()?.into_temp_path();

        {
            let conn = self.inner.lock();
            let mut dst = Connection::open(&scratch)?;

            let backup = Backup::new(&conn, &mut dst)?;
            backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)?;
        }

        let mut file = std::fs::File::open(&scratch)?;
        let mut encoder = GzEncoder::new(w, Compression::default());

        std::io::copy(&mut file, &mut encoder)?;
        encoder.finish()?;

        Ok(())
    }

    /// Restores a store from a gzip snapshot stream, backed by a scratch
    /// file under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream is not a valid snapshot or the
    /// scratch database cannot be created.
    pub fn open_compressed(dir: &Path, r: &mut dyn Read) -> Result<Self, StoreError> {
        let mut scratch = tempfile::Builder::new().prefix("state").tempfile_in(dir)?;

        let mut decoder = GzDecoder::new(r);
        std::io::copy(&mut decoder, &mut scratch)?;
        scratch.flush()?;

        let scratch = scratch.into_temp_path();
        let conn = Connection::open(&scratch)?;

        Self::from_connection(conn, Some(scratch))
    }
}
