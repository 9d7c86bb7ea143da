//! Expansion of downloaded package payloads.

use std::io::{self, Read};

use flate2::read::GzDecoder;

use crate::types::PackageFile;
use crate::util::fs::normalize_rel_path;

pub fn is_archive(name: &str) -> bool {
  let lower = name.to_ascii_lowercase();
  lower.ends_with(".tar.gz") || lower.ends_with(".tgz")
}

/// Extract regular files from a gzipped tarball. Entries escaping the root are skipped.
pub fn extract_tar_gz(bytes: &[u8]) -> io::Result<Vec<PackageFile>> {
  let mut archive = tar::Archive::new(GzDecoder::new(bytes));
  let mut files = Vec::new();

  for entry in archive.entries()? {
    let mut entry = entry?;
    if !entry.header().entry_type().is_file() {
      continue;
    }
    let raw = entry.path()?.to_string_lossy().to_string();
    let path = normalize_rel_path(&raw);
    if path.is_empty() || path.split('/').any(|seg| seg == "..") {
      continue;
    }
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    files.push(PackageFile::new(path, content));
  }

  Ok(files)
}

/// Turn one downloaded file into package files: archives are extracted, anything else is kept
/// under its own name.
pub fn expand(name: &str, bytes: Vec<u8>) -> io::Result<Vec<PackageFile>> {
  if is_archive(name) {
    extract_tar_gz(&bytes)
  } else {
    Ok(vec![PackageFile::new(name, bytes)])
  }
}

#[cfg(test)]
pub(crate) fn build_tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
  use flate2::Compression;
  use flate2::write::GzEncoder;

  let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
  for (path, content) in entries {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content.as_bytes()).unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap()
}
