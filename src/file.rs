// src/file.rs

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::csv::write_row;

/// True when the file is missing or has zero length.
pub fn is_missing_or_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

/// Ensure parent dir exists; create/truncate file; optionally write header.
pub fn write_rows_start(
    path: &Path,
    headers: Option<&[String]>,
    sep: char,
) -> io::Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)?; // truncate/overwrite
    let mut out = BufWriter::new(file);
    if let Some(h) = headers {
        write_row(&mut out, h, sep)?;
    }
    out.flush()
}

/// Append multiple rows to an existing CSV file (must be created already).
pub fn append_rows(
    path: &Path,
    rows: &[Vec<String>],
    sep: char,
) -> io::Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    let mut out = BufWriter::new(file);
    for row in rows {
        write_row(&mut out, row, sep)?;
    }
    out.flush()
}

/// Append rows, writing `headers` first only when the file is new or empty.
/// Existing content is never rewritten.
pub fn append_rows_with_header(
    path: &Path,
    headers: &[String],
    rows: &[Vec<String>],
    sep: char,
) -> io::Result<()> {
    if is_missing_or_empty(path) {
        write_rows_start(path, Some(headers), sep)?;
    }
    append_rows(path, rows, sep)
}

/// Replace `path` with `contents` via a sibling temp file and a rename,
/// so readers never observe a half-written file.
pub fn replace_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;
    let tmp = sibling_with_suffix(path, ".tmp");
    {
        let file = File::create(&tmp)?;
        let mut out = BufWriter::new(file);
        out.write_all(contents)?;
        out.flush()?;
        out.get_ref().sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Copy `path` to `<path>.bak`, overwriting any previous backup.
pub fn backup_copy(path: &Path) -> io::Result<PathBuf> {
    let bak = sibling_with_suffix(path, ".bak");
    fs::copy(path, &bak)?;
    Ok(bak)
}

pub fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_directory(dir: &Path) -> io::Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Path exists but is not a directory: {}", dir.display()),
        ));
    }
    if !dir.exists() { fs::create_dir_all(dir)?; }
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
