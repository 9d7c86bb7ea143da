//! Small filesystem helpers shared by the store and the sink deployer.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// Write `value` as pretty JSON to `path` by writing a sibling temp file and renaming it over the target.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
  let dir = path.parent().unwrap_or(Path::new("."));
  let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
  serde_json::to_writer_pretty(&mut tmp, value).map_err(io::Error::other)?;
  tmp.write_all(b"\n")?;
  tmp.as_file().sync_all()?;
  tmp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Normalize a package-relative path to forward slashes, without leading `./` or `/`.
pub fn normalize_rel_path(path: &str) -> String {
  let forward = path.replace('\\', "/");
  let mut trimmed = forward.as_str();
  loop {
    if let Some(rest) = trimmed.strip_prefix("./") {
      trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix('/') {
      trimmed = rest;
    } else {
      break;
    }
  }
  trimmed.to_string()
}

/// Join a package-relative path onto `base`, rejecting absolute paths and `..` traversal.
///
/// Returns `None` if the path would escape `base` or is empty.
pub fn safe_join(base: &Path, rel: &str) -> Option<PathBuf> {
  let normalized = normalize_rel_path(rel);
  let rel_path = Path::new(&normalized);
  let mut out = base.to_path_buf();
  let mut depth = 0usize;

  for component in rel_path.components() {
    match component {
      Component::Normal(part) => {
        out.push(part);
        depth += 1;
      }
      Component::CurDir => {}
      _ => return None,
    }
  }

  if depth == 0 { None } else { Some(out) }
}

/// Remove empty directories from `start` upwards, stopping before `stop`.
///
/// Best-effort: the first non-empty or unremovable directory ends the walk.
pub fn prune_empty_parents(start: &Path, stop: &Path) {
  let mut current = Some(start);
  while let Some(dir) = current {
    if dir == stop || !dir.starts_with(stop) {
      break;
    }
    if fs::remove_dir(dir).is_err() {
      break;
    }
    current = dir.parent();
  }
}
