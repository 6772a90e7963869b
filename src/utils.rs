//! Small filesystem helpers in the teacher's `utils.rs` style: plain
//! `std::path` manipulation, no extra path crate.

use std::fs::create_dir_all;
use std::path::Path;
use walkdir::WalkDir;

/// Checks to see if a directory is present, if not creates it.
pub fn check_or_create_dir(path: &Path) -> std::io::Result<()> {
    if !path.is_dir() {
        create_dir_all(path)?;
    }
    Ok(())
}

/// Collects every `.s` assembly file under `dir`, sorted for deterministic
/// iteration order (used by `check-predictors` batch scanning).
pub fn get_asm_paths_from_dir(dir: &Path) -> Vec<String> {
    let mut paths: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().map(|e| e == "s").unwrap_or(false))
        .map(|entry| entry.path().to_string_lossy().into_owned())
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_or_create_dir_creates_missing_dir() {
        let tmp = std::env::temp_dir().join(format!("anica_test_utils_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&tmp);
        assert!(!tmp.is_dir());
        check_or_create_dir(&tmp).unwrap();
        assert!(tmp.is_dir());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn get_asm_paths_from_dir_only_picks_up_s_files() {
        let tmp = std::env::temp_dir().join(format!("anica_test_asm_{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join("a.s"), "add eax, ebx").unwrap();
        std::fs::write(tmp.join("b.json"), "{}").unwrap();
        let paths = get_asm_paths_from_dir(&tmp);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("a.s"));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
