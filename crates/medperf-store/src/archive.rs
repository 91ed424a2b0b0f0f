use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{io_error, StoreError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract a tar or tar.gz archive into `dest`, then remove the archive.
///
/// Entries escaping `dest` are rejected by `tar` itself.
///
/// # Errors
///
/// Returns [`StoreError::Io`] when the archive cannot be read or unpacked.
pub fn untar(archive: &Path, dest: &Path) -> Result<(), StoreError> {
    let mut file = File::open(archive).map_err(io_error("open", archive))?;
    let mut magic = [0_u8; 2];
    let gzipped = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(_) => false,
    };
    file.seek(SeekFrom::Start(0))
        .map_err(io_error("read", archive))?;
    fs::create_dir_all(dest).map_err(io_error("create", dest))?;

    let reader = BufReader::new(file);
    let unpacked = if gzipped {
        Archive::new(GzDecoder::new(reader)).unpack(dest)
    } else {
        Archive::new(reader).unpack(dest)
    };
    unpacked.map_err(io_error("extract", archive))?;
    fs::remove_file(archive).map_err(io_error("remove", archive))?;
    Ok(())
}
