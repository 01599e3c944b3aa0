use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::TranscodeConfig;
use crate::pipeline::PipelineSummary;

/// What one `run` produced, written next to the outputs on request.
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub generated_at: DateTime<Utc>,
    pub config_version: u32,
    pub container_format: String,
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Serialize)]
pub struct JobEntry {
    pub input: PathBuf,
    pub output: PathBuf,
    pub packets_read: u64,
    pub packets_dropped: u64,
    /// Packets muxed per output stream index.
    pub packets_written: Vec<u64>,
    pub trailer_written: bool,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl JobReport {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            generated_at: Utc::now(),
            config_version: config.version,
            container_format: config.container_format.clone(),
            jobs: Vec::new(),
        }
    }

    /// Records a finished job; the output is hashed when it is a regular file.
    pub fn record(&mut self, input: &Path, output: &Path, summary: &PipelineSummary) -> Result<()> {
        let sha256 = if output.is_file() {
            Some(compute_sha256(output)?)
        } else {
            None
        };
        self.jobs.push(JobEntry {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            packets_read: summary.packets_read,
            packets_dropped: summary.packets_dropped,
            packets_written: summary.packets_written.clone(),
            trailer_written: summary.trailer_written,
            elapsed_ms: summary.elapsed.as_secs_f64() * 1_000.0,
            sha256,
        });
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_yaml::to_writer(file, self)
            .with_context(|| format!("Failed to write report YAML: {}", path.display()))?;
        Ok(())
    }
}

/// Compute the SHA256 digest of the file at `path` and return it as a hex string.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
