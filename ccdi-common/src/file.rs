use std::{fs, path::Path};

use crate::to_string;

// ============================================ PUBLIC =============================================

pub fn read_text_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path)
        .map_err(|err| format!("Could not read {}: {}", path.to_string_lossy(), err))
}

pub fn save_text_file(contents: &str, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_string)?;
    }

    fs::write(path, contents)
        .map_err(|err| format!("Could not write {}: {}", path.to_string_lossy(), err))
}
