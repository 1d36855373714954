//! Persisting finished tracking sessions.
//!
//! Each persisted session gets its own directory under the recovery root,
//! named after the moment it was saved:
//!
//! ```text
//! recovery/
//!   track_20240309_14-05-07/
//!     CONFIG.INI
//!     data.csv
//! ```
//!
//! `CONFIG.INI` holds a single `[TRACK]` section with the `name`, `nb_points`,
//! `mode` and `description` of the session. `data.csv` holds one row per
//! sample, in the order they were recorded, under a `R,THETA,PHI,TIME` header.

use chrono::NaiveDateTime;
use log::{info, warn};
use std::{
    borrow::Cow,
    fmt,
    fs::{self, File},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use crate::{
    session::{SessionMetadata, TrackingMode},
    tracking_sample::{TrackingSample, Trajectory, TIMESTAMP_FORMAT},
};

pub const CONFIG_FILE: &str = "CONFIG.INI";
pub const DATA_FILE: &str = "data.csv";
const SECTION: &str = "TRACK";
const HEADER: [&str; 4] = ["R", "THETA", "PHI", "TIME"];
const DIRECTORY_FORMAT: &str = "track_%Y%m%d_%H-%M-%S";

/// How many suffixed names are tried before giving up on a name clash.
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug)]
pub enum RecordError {
    /// Returned when io fails while reading or writing a record.
    IoError(io::Error),
    /// Returned when the CSV layer fails.
    CsvError(csv::Error),
    /// Every candidate directory name for the record was already taken.
    NameExhausted(PathBuf),
    /// The files of a record do not look like a record.
    Malformed(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RecordError as RE;
        let msg = match self {
            RE::IoError(error) => Cow::from(format!("io error: {}", error)),
            RE::CsvError(error) => Cow::from(format!("csv error: {}", error)),
            RE::NameExhausted(path) => Cow::from(format!(
                "no free directory name left for {}",
                path.display()
            )),
            RE::Malformed(why) => Cow::from(format!("malformed record: {}", why)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RecordError {}

impl From<io::Error> for RecordError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<csv::Error> for RecordError {
    fn from(value: csv::Error) -> Self {
        Self::CsvError(value)
    }
}

/// A session that made it to disk. Export collaborators use it to find the
/// files again.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub name: String,
    pub directory: PathBuf,
    pub nb_points: usize,
    pub metadata: SessionMetadata,
}

/// Writes finished sessions under a recovery root.
#[derive(Debug, Clone)]
pub struct TrajectoryRecorder {
    root: PathBuf,
}

impl TrajectoryRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `track` and its metadata to a fresh directory named after
    /// `saved_at`. If that name is taken, `_2`, `_3`, ... are appended until a
    /// free one is found.
    pub fn finalize(
        &self,
        metadata: &SessionMetadata,
        track: &Trajectory,
        saved_at: NaiveDateTime,
    ) -> Result<PersistedRecord, RecordError> {
        fs::create_dir_all(&self.root)?;
        let (name, directory) = self.claim_directory(saved_at)?;

        let mut config = File::create(directory.join(CONFIG_FILE))?;
        write_config(&mut config, &name, track.len(), metadata)?;
        config.flush()?;

        let data = File::create(directory.join(DATA_FILE))?;
        write_samples(data, track)?;

        info!(
            "saved {} samples to {}",
            track.len(),
            directory.display()
        );
        Ok(PersistedRecord {
            name,
            directory,
            nb_points: track.len(),
            metadata: metadata.clone(),
        })
    }

    fn claim_directory(&self, saved_at: NaiveDateTime) -> Result<(String, PathBuf), RecordError> {
        let base = saved_at.format(DIRECTORY_FORMAT).to_string();
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = match attempt {
                1 => base.clone(),
                n => format!("{}_{}", base, n),
            };
            let directory = self.root.join(&name);
            // `create_dir` fails on an existing directory, which is exactly
            // the check we need without racing another writer.
            match fs::create_dir(&directory) {
                Ok(()) => return Ok((name, directory)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("{} already exists, trying another name", directory.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RecordError::NameExhausted(self.root.join(base)))
    }
}

/// Writes the `[TRACK]` section. Multi-line descriptions are continued on
/// tab-indented lines.
pub fn write_config(
    out: &mut impl Write,
    name: &str,
    nb_points: usize,
    metadata: &SessionMetadata,
) -> io::Result<()> {
    writeln!(out, "[{}]", SECTION)?;
    writeln!(out, "name = {}", name)?;
    writeln!(out, "nb_points = {}", nb_points)?;
    writeln!(out, "mode = {}", metadata.mode)?;
    writeln!(out, "description = {}", metadata.description.replace('\n', "\n\t"))?;
    writeln!(out)
}

/// Reads the `[TRACK]` section back, as `(name, nb_points, metadata)`.
pub fn read_config(input: impl Read) -> Result<(String, usize, SessionMetadata), RecordError> {
    let mut in_section = false;
    let mut entries: Vec<(String, String)> = Vec::new();

    for line in BufReader::new(input).lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if let Some(continued) = line.strip_prefix('\t') {
            if let (true, Some((_, value))) = (in_section, entries.last_mut()) {
                value.push('\n');
                value.push_str(continued);
            }
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(section) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            in_section = section == SECTION;
            continue;
        }
        if in_section {
            let (key, value) = trimmed
                .split_once('=')
                .ok_or_else(|| RecordError::Malformed(format!("line {:?} has no '='", trimmed)))?;
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    let get = |key: &str| -> Result<&str, RecordError> {
        entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| RecordError::Malformed(format!("missing {:?} in [{}]", key, SECTION)))
    };

    let name = get("name")?.to_string();
    let nb_points = get("nb_points")?
        .parse()
        .map_err(|e| RecordError::Malformed(format!("bad nb_points: {}", e)))?;
    let mode: TrackingMode = get("mode")?.parse().map_err(RecordError::Malformed)?;
    let description = get("description")?.to_string();

    Ok((name, nb_points, SessionMetadata { mode, description }))
}

/// Writes the header and one row per sample.
pub fn write_samples(out: impl Write, track: &Trajectory) -> Result<(), RecordError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(HEADER)?;
    for sample in track.samples() {
        let (r, theta, phi) = sample.coords();
        wtr.write_record(&[
            r.to_string(),
            theta.to_string(),
            phi.to_string(),
            sample.formatted_timestamp(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads samples written by [write_samples].
pub fn read_samples(input: impl Read) -> Result<Trajectory, RecordError> {
    let mut rdr = csv::Reader::from_reader(input);
    let header = rdr.headers()?;
    if header.iter().ne(HEADER.iter().copied()) {
        return Err(RecordError::Malformed(format!(
            "unexpected header {:?}",
            header
        )));
    }

    let mut samples = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let number = |i: usize| -> Result<f64, RecordError> {
            rec[i]
                .trim()
                .parse()
                .map_err(|e| RecordError::Malformed(format!("bad {} {:?}: {}", HEADER[i], &rec[i], e)))
        };
        let timestamp = NaiveDateTime::parse_from_str(rec[3].trim(), TIMESTAMP_FORMAT)
            .map_err(|e| RecordError::Malformed(format!("bad TIME {:?}: {}", &rec[3], e)))?;
        samples.push(TrackingSample::from_parts(
            (number(0)?, number(1)?, number(2)?),
            timestamp,
        ));
    }
    Ok(Trajectory::from(samples))
}

/// Loads a persisted record from its directory.
pub fn load_record(directory: impl AsRef<Path>) -> Result<(PersistedRecord, Trajectory), RecordError> {
    let directory = directory.as_ref();
    let (name, nb_points, metadata) = read_config(File::open(directory.join(CONFIG_FILE))?)?;
    let track = read_samples(File::open(directory.join(DATA_FILE))?)?;
    if track.len() != nb_points {
        return Err(RecordError::Malformed(format!(
            "{} declares {} points but holds {}",
            CONFIG_FILE,
            nb_points,
            track.len()
        )));
    }

    Ok((
        PersistedRecord {
            name,
            directory: directory.to_path_buf(),
            nb_points,
            metadata,
        },
        track,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::Rotation;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn stamp(second: u32, micros: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(14, 5, second, micros)
            .unwrap()
    }

    fn track_of(n: usize) -> Trajectory {
        (0..n)
            .map(|i| {
                TrackingSample::at(
                    2.0,
                    Rotation::new(1.3 * i as f64, 0.7 * i as f64, 0.0),
                    stamp(i as u32, 123_456),
                )
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            mode: TrackingMode::Surface,
            description: "bee on the left petal\nsecond attempt".to_string(),
        }
    }

    #[test]
    fn config_layout() {
        let mut buf = Vec::new();
        write_config(&mut buf, "track_20240309_14-05-07", 4, &metadata()).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "[TRACK]\n\
             name = track_20240309_14-05-07\n\
             nb_points = 4\n\
             mode = Surface Mode\n\
             description = bee on the left petal\n\
             \tsecond attempt\n\
             \n"
        );
    }

    #[test]
    fn config_reads_back() {
        let mut buf = Vec::new();
        write_config(&mut buf, "track_x", 7, &metadata()).unwrap();
        let (name, nb_points, meta) = read_config(Cursor::new(buf)).unwrap();
        assert_eq!(name, "track_x");
        assert_eq!(nb_points, 7);
        assert_eq!(meta, metadata());
    }

    #[test]
    fn csv_layout() {
        let mut buf = Vec::new();
        write_samples(&mut buf, &track_of(2)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "R,THETA,PHI,TIME");
        assert_eq!(lines[1], "2,0,0,2024-03-09 14:05:00.123456");
        assert!(lines[2].starts_with("2,0.0226"));
        assert!(lines[2].ends_with(",2024-03-09 14:05:01.123456"));
    }

    #[test]
    fn samples_survive_csv() {
        let track = track_of(5);
        let mut buf = Vec::new();
        write_samples(&mut buf, &track).unwrap();
        let read = read_samples(Cursor::new(buf)).unwrap();

        assert_eq!(read.len(), 5);
        for (orig, back) in track.samples().iter().zip(read.samples()) {
            assert!((orig.theta_degrees() - back.theta_degrees()).abs() < 0.05);
            assert!((orig.phi_degrees() - back.phi_degrees()).abs() < 0.05);
            assert_eq!(orig.formatted_timestamp(), back.formatted_timestamp());
        }
    }

    #[test]
    fn finalize_writes_one_directory() {
        let root = tempfile::tempdir().unwrap();
        let recorder = TrajectoryRecorder::new(root.path().join("recovery"));
        let track = track_of(4);

        let record = recorder.finalize(&metadata(), &track, stamp(7, 0)).unwrap();

        assert_eq!(record.name, "track_20240309_14-05-07");
        assert_eq!(record.nb_points, 4);
        let entries: Vec<_> = fs::read_dir(recorder.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let text = fs::read_to_string(record.directory.join(DATA_FILE)).unwrap();
        assert_eq!(text.lines().count(), 5);

        let (loaded, loaded_track) = load_record(&record.directory).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded_track.len(), 4);
    }

    #[test]
    fn name_clash_gets_a_suffix() {
        let root = tempfile::tempdir().unwrap();
        let recorder = TrajectoryRecorder::new(root.path());
        let track = track_of(3);

        let first = recorder.finalize(&metadata(), &track, stamp(7, 0)).unwrap();
        let second = recorder.finalize(&metadata(), &track, stamp(7, 500)).unwrap();

        assert_eq!(first.name, "track_20240309_14-05-07");
        assert_eq!(second.name, "track_20240309_14-05-07_2");
        assert!(second.directory.join(CONFIG_FILE).exists());
    }

    #[test]
    fn unwritable_root_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("recovery");
        fs::write(&blocker, b"not a directory").unwrap();
        let recorder = TrajectoryRecorder::new(&blocker);

        assert!(matches!(
            recorder.finalize(&metadata(), &track_of(3), stamp(7, 0)),
            Err(RecordError::IoError(_))
        ));
    }

    #[test]
    fn mismatched_point_count_is_malformed() {
        let root = tempfile::tempdir().unwrap();
        let recorder = TrajectoryRecorder::new(root.path());
        let record = recorder.finalize(&metadata(), &track_of(3), stamp(7, 0)).unwrap();
        let mut config = File::create(record.directory.join(CONFIG_FILE)).unwrap();
        write_config(&mut config, &record.name, 9, &metadata()).unwrap();

        assert!(matches!(
            load_record(&record.directory),
            Err(RecordError::Malformed(_))
        ));
    }
}
