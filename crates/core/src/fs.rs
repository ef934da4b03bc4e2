//! Filesystem utilities

use std::fs;
use std::path::Path;

use log::info;

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all(path: &str) -> std::io::Result<()> {
    let path = Path::new(path);
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_dir_all_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("valley-wx-fs-{}", std::process::id()));
        let dir = dir.to_string_lossy().to_string();
        create_dir_all(&dir).unwrap();
        create_dir_all(&dir).unwrap();
        assert!(Path::new(&dir).is_dir());
        let _ = fs::remove_dir_all(&dir);
    }
}
