//! On-disk scan session: `{savepath}/{started_at}/` with the `info` record
//! written before any sample.

use crate::data::compile::RecordName;
use crate::error::AppResult;
use crate::instrument::capabilities::{Acquisition, SampleRange};
use crate::metadata::SessionInfo;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const INFO_FILE: &str = "info";

#[derive(Debug)]
pub struct ScanSession {
    dir: PathBuf,
    records: usize,
}

impl ScanSession {
    /// Create the session folder and write `info` into it.
    ///
    /// A second session started within the same second gets a `-N` suffix.
    pub fn create(savepath: &Path, info: &SessionInfo) -> AppResult<Self> {
        fs::create_dir_all(savepath)?;
        let base = info.started_at.to_string();
        let mut dir = savepath.join(&base);
        let mut n = 1;
        while dir.exists() {
            dir = savepath.join(format!("{base}-{n}"));
            n += 1;
        }
        fs::create_dir(&dir)?;
        info.write_to(&dir.join(INFO_FILE))?;
        info!(dir = %dir.display(), pattern = %info.pattern, "Scan session created");
        Ok(Self { dir, records: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Record base path (no extension) for a named point or line.
    pub fn record_base(&self, name: &RecordName) -> PathBuf {
        self.dir.join(name.to_string())
    }

    /// Record for `duration` and store the result under `name`.
    pub async fn capture(
        &mut self,
        acquisition: &dyn Acquisition,
        name: &RecordName,
        duration: Duration,
        range: &SampleRange,
        delay: Duration,
    ) -> AppResult<PathBuf> {
        let path = acquisition
            .record_to_file(duration, &self.record_base(name), range, delay)
            .await?;
        self.records += 1;
        debug!(path = %path.display(), records = self.records, "Record stored");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SessionInfoBuilder;

    #[test]
    fn info_is_written_before_samples() {
        let tmp = tempfile::tempdir().unwrap();
        let info = SessionInfoBuilder::new("rectangular_lattice")
            .started_at(1_552_440_057)
            .note("bench")
            .build();

        let session = ScanSession::create(tmp.path(), &info).unwrap();
        assert_eq!(session.dir(), tmp.path().join("1552440057"));
        let text = fs::read_to_string(session.dir().join(INFO_FILE)).unwrap();
        assert!(text.starts_with("pattern: rectangular_lattice"));
        assert_eq!(session.records(), 0);

        let again = ScanSession::create(tmp.path(), &info).unwrap();
        assert_eq!(again.dir(), tmp.path().join("1552440057-1"));
    }

    #[test]
    fn record_names_follow_coordinates() {
        let tmp = tempfile::tempdir().unwrap();
        let info = SessionInfoBuilder::new("continuous_raster").started_at(7).build();
        let session = ScanSession::create(tmp.path(), &info).unwrap();

        let point = RecordName::Point {
            x: 0.5,
            y: 1.0,
            z: 0.0,
        };
        assert_eq!(session.record_base(&point), session.dir().join("0.5_1_0"));
    }
}
