//! Private binary format: an 8-byte versioned marker followed by tagged
//! bincode records.
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::NGramError;

/// Marker and format version. Bump the last bytes on incompatible changes.
pub const MAGIC: &[u8; 8] = b"NGLM\x00\x00\x00\x02";

pub fn write_magic<W: Write + ?Sized>(w: &mut W) -> Result<()> {
    w.write_all(MAGIC)?;
    Ok(())
}

/// Consume the marker if the stream starts with it, otherwise leave the
/// stream untouched and return false so it can be re-read as text.
pub fn read_magic<R: BufRead>(r: &mut R) -> Result<bool> {
    let buf = r.fill_buf()?;
    if buf.len() >= MAGIC.len() && &buf[..MAGIC.len()] == MAGIC {
        r.consume(MAGIC.len());
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Like `read_magic` but a mismatch is an error.
pub fn expect_magic<R: BufRead>(r: &mut R) -> Result<()> {
    if read_magic(r)? {
        Ok(())
    } else {
        Err(NGramError::BadMagic.into())
    }
}

/// Write a header tag followed by one value.
pub fn write_record<W, T>(w: &mut W, tag: &str, value: &T) -> Result<()>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    bincode::serialize_into(&mut *w, tag)?;
    bincode::serialize_into(&mut *w, value)?;
    Ok(())
}

/// Read the header tag `tag` and the value following it.
pub fn read_record<R: Read, T: DeserializeOwned>(r: &mut R, tag: &str) -> Result<T> {
    let found: String = bincode::deserialize_from(&mut *r)?;
    if found != tag {
        bail!("expected {} record, found {}", tag, found);
    }
    let value = bincode::deserialize_from(&mut *r)?;
    Ok(value)
}

pub fn open_reader(path: &Path) -> Result<BufReader<File>> {
    let fh = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(fh))
}

/// Write through a temporary file in the destination directory, then
/// move it into place so readers never see a partial file.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(&tmp);
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}
