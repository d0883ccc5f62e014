//! Sync task configuration

use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::schedule::Schedule;

/// Configuration for one mirror task: an S3 prefix pulled into a local
/// directory. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSpec {
    /// Cron expression or `@every` shorthand; `None` means the task only
    /// runs once at startup.
    pub schedule: Option<String>,
    /// AWS region override; falls back to the environment default.
    pub region: Option<String>,
    pub bucket: String,
    pub prefix: String,
    /// Destination directory for the mirrored tree.
    pub dst: String,
    /// Run immediately at startup in addition to the schedule.
    pub on_start: bool,
}

impl SyncSpec {
    /// Decode a `--sync` value: one CSV record of `key=value` fields.
    ///
    /// Recognized keys are `schedule`, `region`, `bucket`, `prefix`, `dst`
    /// and `on-start`; the last three of `bucket`/`prefix`/`dst` are
    /// required. Schedules are validated here so malformed expressions
    /// fail at flag parsing.
    pub fn from_csv(value: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(value.as_bytes());

        let mut record = csv::StringRecord::new();
        let read = reader
            .read_record(&mut record)
            .map_err(|e| SyncError::Config(format!("invalid sync value '{value}': {e}")))?;
        if !read {
            return Err(SyncError::Config(format!("empty sync value '{value}'")));
        }

        let mut spec = SyncSpec {
            schedule: None,
            region: None,
            bucket: String::new(),
            prefix: String::new(),
            dst: String::new(),
            on_start: false,
        };

        for field in record.iter() {
            let Some((key, value)) = field.split_once('=') else {
                return Err(SyncError::Config(format!(
                    "invalid field '{field}': must be a key=value pair"
                )));
            };
            match key {
                "schedule" => {
                    if !value.is_empty() {
                        spec.schedule = Some(value.to_string());
                    }
                }
                "region" => {
                    if !value.is_empty() {
                        spec.region = Some(value.to_string());
                    }
                }
                "bucket" => spec.bucket = value.to_string(),
                "prefix" => spec.prefix = value.to_string(),
                "dst" => spec.dst = value.to_string(),
                "on-start" => {
                    spec.on_start = value.parse().map_err(|_| {
                        SyncError::Config(format!("invalid on-start value '{value}'"))
                    })?;
                }
                _ => {
                    return Err(SyncError::Config(format!(
                        "unexpected key '{key}' in '{field}'"
                    )));
                }
            }
        }

        if spec.bucket.is_empty() {
            return Err(SyncError::Config("bucket is required".to_string()));
        }
        if spec.prefix.is_empty() {
            return Err(SyncError::Config("prefix is required".to_string()));
        }
        if spec.dst.is_empty() {
            return Err(SyncError::Config("dst is required".to_string()));
        }
        if let Some(schedule) = &spec.schedule {
            schedule.parse::<Schedule>()?;
        }

        Ok(spec)
    }

    /// Canonical CSV encoding: fixed key order, optional keys omitted when
    /// unset. The image `Cmd` is assembled from this, so the encoding must
    /// be reproducible.
    pub fn to_csv(&self) -> Result<String> {
        let mut fields = Vec::with_capacity(6);
        if let Some(schedule) = &self.schedule {
            fields.push(format!("schedule={schedule}"));
        }
        if let Some(region) = &self.region {
            fields.push(format!("region={region}"));
        }
        fields.push(format!("bucket={}", self.bucket));
        fields.push(format!("prefix={}", self.prefix));
        fields.push(format!("dst={}", self.dst));
        fields.push(format!("on-start={}", self.on_start));

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(&fields)
            .map_err(|e| SyncError::Config(format!("encoding sync spec: {e}")))?;
        let bytes = writer
            .into_inner()
            .map_err(|e| SyncError::Config(format!("encoding sync spec: {e}")))?;
        let encoded = String::from_utf8(bytes)
            .map_err(|e| SyncError::Config(format!("encoding sync spec: {e}")))?;

        Ok(encoded.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl FromStr for SyncSpec {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_csv(s)
    }
}
