use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use tempfile::NamedTempFile;

/// Reads a text file and returns all its lines as a `Vec<String>`.
///
/// - Reads the entire file into memory
/// - Splits on `\n` / `\r\n`
pub(crate) fn read_file<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut contents = String::new();
	File::open(filename)?.read_to_string(&mut contents)?;
	Ok(contents.lines().map(str::to_owned).collect())
}

/// Writes `bytes` to `path` through a uniquely named sibling temporary file
/// and a rename.
///
/// Readers observe either the previous file or one complete new one, never a
/// partial write. Concurrent writers to the same path each publish a whole
/// file and the last rename wins.
pub(crate) fn write_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> io::Result<()> {
	let path = path.as_ref();
	if path.file_name().is_none() {
		return Err(io::Error::new(io::ErrorKind::InvalidInput, "Path has no filename"));
	}
	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};

	let mut file = NamedTempFile::new_in(dir)?;
	file.write_all(bytes)?;
	file.as_file().sync_all()?;
	file.persist(path).map_err(|e| e.error)?;
	Ok(())
}

/// Normalize a folder path.
///
/// - `"."` or `"./"` resolves to the current working directory
/// - Other paths are returned as-is (not canonicalized)
pub(crate) fn normalize_folder(input: &str) -> PathBuf {
	if input == "." || input == "./" {
		env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
	} else {
		PathBuf::from(input)
	}
}

/// Lists the names of all subdirectories of `dir`.
///
/// A missing `dir` yields an empty list.
pub(crate) fn list_dirs<P: AsRef<Path>>(dir: P) -> io::Result<Vec<String>> {
	let mut dirs = Vec::new();

	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dirs),
		Err(e) => return Err(e),
	};

	for entry in entries {
		let path = entry?.path();
		if path.is_dir() {
			if let Some(name) = path.file_name() {
				dirs.push(name.to_string_lossy().to_string());
			}
		}
	}

	Ok(dirs)
}

/// Lists the stems of all `.{extension}` files of `dir`.
///
/// A missing `dir` yields an empty list.
pub(crate) fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> io::Result<Vec<String>> {
	let mut files = Vec::new();

	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
		Err(e) => return Err(e),
	};

	for entry in entries {
		let path = entry?.path();
		if path.is_file() && path.extension() == Some(std::ffi::OsStr::new(extension)) {
			if let Some(stem) = path.file_stem() {
				files.push(stem.to_string_lossy().to_string());
			}
		}
	}

	Ok(files)
}

/// Returns `true` if `identifier` can be used as a single path component.
///
/// Identifiers are opaque, but they end up as directory and file names,
/// so separators, leading dots and control characters are refused.
pub(crate) fn is_valid_identifier(identifier: &str) -> bool {
	!identifier.is_empty()
		&& !identifier.starts_with('.')
		&& identifier
			.chars()
			.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
