// src/compress.rs
// Unpacks verified dist archives (.tar or gzip-compressed .tar).

use crate::error::{RepoError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extracts `source_file` into `dest_dir`, sniffing gzip from the magic bytes.
pub fn extract_archive(source_file: &Path, dest_dir: &Path) -> Result<()> {
    if !source_file.exists() {
        return Err(RepoError::NotFound(format!("Source file not found: {}", source_file.display())));
    }

    fs::create_dir_all(dest_dir)?;
    let mut file = File::open(source_file)?;
    let mut magic = [0u8; 2];
    let gzipped = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;

    let reader = BufReader::new(file);
    if gzipped {
        Archive::new(GzDecoder::new(reader)).unpack(dest_dir)?;
    } else {
        Archive::new(reader).unpack(dest_dir)?;
    }
    Ok(())
}
