//! File Handlers Module
//!
//! This module turns a report file on disk into XML text. Plain XML, gzip and zip
//! reports are recognised by their file name, and every path applies the configured
//! security limits: file size, decompressed size, zip entry count, compression ratio,
//! entry name length and path traversal.
use crate::config::Config;
use crate::error::{DmarcError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::ZipArchive;

const BUFFER_SIZE: usize = 8192; // 8KB buffer

/// How a report file is packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEncoding {
    Xml,
    Gzip,
    Zip,
}

impl ReportEncoding {
    /// Picks the encoding from the file name. Anything that is not `.zip` or `.gz`
    /// is read as plain XML.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            ReportEncoding::Zip
        } else if name.ends_with(".gz") {
            ReportEncoding::Gzip
        } else {
            ReportEncoding::Xml
        }
    }
}

/// FileHandler decodes a report file according to its encoding.
#[derive(Debug, Clone)]
pub struct FileHandler {
    config: Config,
}

impl FileHandler {
    /// Creates a new FileHandler with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Reads the file at `path` and returns the XML text it carries.
    pub fn process_file(&self, path: &Path) -> Result<String> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size > self.config.max_file_size as u64 {
            return Err(DmarcError::FileTooLarge(format!(
                "File size {} bytes exceeds limit of {} bytes",
                file_size, self.config.max_file_size
            )));
        }
        let encoding = ReportEncoding::from_path(path);
        log::debug!("Decoding {} as {:?}", path.display(), encoding);
        match encoding {
            ReportEncoding::Zip => self.handle_zip(file),
            ReportEncoding::Gzip => self.handle_gzip(file),
            ReportEncoding::Xml => self.handle_xml(file),
        }
    }

    /// Extracts the first `.xml` entry of a zip archive; other entries are ignored.
    fn handle_zip(&self, file: File) -> Result<String> {
        let reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut archive = ZipArchive::new(reader)?;
        if archive.len() > self.config.max_files_in_zip {
            return Err(DmarcError::Format(format!(
                "Too many files in archive: {}",
                archive.len()
            )));
        }
        for i in 0..archive.len() {
            let mut file_in_zip = archive.by_index(i)?;
            let inner_name = file_in_zip.name().to_string();
            if !inner_name.ends_with(".xml") {
                continue;
            }
            // Prevent path traversal
            if inner_name.contains("..") || inner_name.starts_with('/') || inner_name.starts_with('\\') {
                return Err(DmarcError::Format(format!(
                    "Path traversal attempt detected: {}",
                    inner_name
                )));
            }
            if inner_name.len() > self.config.max_filename_length {
                return Err(DmarcError::Format("Filename too long".to_string()));
            }
            let compressed_size = file_in_zip.compressed_size();
            let uncompressed_size = file_in_zip.size();
            if compressed_size > 0 {
                let compression_ratio = uncompressed_size as f64 / compressed_size as f64;
                if compression_ratio > self.config.max_compression_ratio {
                    return Err(DmarcError::Format(format!(
                        "Suspicious compression ratio: {:.2}",
                        compression_ratio
                    )));
                }
            }
            if uncompressed_size > self.config.max_decompressed_size as u64 {
                return Err(DmarcError::FileTooLarge(format!(
                    "Decompressed size of {} too large",
                    inner_name
                )));
            }
            // The header size can lie, so cap the actual read as well.
            let limit = self.config.max_decompressed_size as u64;
            let mut contents = String::with_capacity(uncompressed_size.min(limit) as usize);
            (&mut file_in_zip).take(limit + 1).read_to_string(&mut contents)?;
            if contents.len() as u64 > limit {
                return Err(DmarcError::FileTooLarge(format!(
                    "Decompressed size of {} too large",
                    inner_name
                )));
            }
            return Ok(contents);
        }
        Err(DmarcError::Format("No XML report found in ZIP".into()))
    }

    /// Decompresses a gzip report.
    fn handle_gzip(&self, file: File) -> Result<String> {
        let gz = GzDecoder::new(BufReader::with_capacity(BUFFER_SIZE, file));
        self.read_limited(gz, "Decompressed GZ size")
    }

    /// Reads a plain XML report.
    fn handle_xml(&self, file: File) -> Result<String> {
        self.read_limited(BufReader::new(file), "XML file size")
    }

    fn read_limited<R: Read>(&self, reader: R, what: &str) -> Result<String> {
        let limit = self.config.max_decompressed_size as u64;
        let mut contents = String::new();
        let len = reader.take(limit + 1).read_to_string(&mut contents)?;
        if len as u64 > limit {
            return Err(DmarcError::FileTooLarge(format!(
                "{} exceeds limit of {} bytes",
                what, limit
            )));
        }
        Ok(contents)
    }
}
