use log::{info, warn};
use std::fs;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Read the persisted machine id, generating and saving one on first use
///
/// Returns `None` (after logging) when the file can't be read or written.
pub fn get_or_create_machine_id(path: &Path) -> Option<String> {
    match read_or_create(path) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Can't read or create machine id at {}: {}", path.display(), e);
            None
        }
    }
}

fn read_or_create(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let id = contents.trim();
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let id = Uuid::new_v4().simple().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &id)?;
    info!("Generated new machine id in {}", path.display());
    Ok(id)
}
