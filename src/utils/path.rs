use std::path::{Path, PathBuf};

/// Resolve a configured file name against the data directory.
///
/// Absolute paths are kept as they are, so a deployment can point a ledger
/// at a different disk; relative names land under `base`.
pub fn resolve_under(base: &Path, raw: impl AsRef<Path>) -> PathBuf {
    let raw_path = raw.as_ref();
    if raw_path.is_absolute() {
        raw_path.to_path_buf()
    } else {
        base.join(raw_path)
    }
}
