//! Filesystem infrastructure: implements `ConfigWriter`.

use std::io::Write as _;
use std::path::Path;

use crate::application::ports::ConfigWriter;
use crate::domain::ProvisionError;

/// Writes files readable and writable by the owner only (mode 600).
#[derive(Debug, Default)]
pub struct PrivateFileWriter;

impl ConfigWriter for PrivateFileWriter {
    fn write_private(&self, path: &Path, data: &[u8]) -> Result<(), ProvisionError> {
        let persist = |source| ProvisionError::Persist {
            path: path.to_path_buf(),
            source,
        };

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(persist)?;
        file.write_all(data).map_err(persist)?;
        // `mode` only applies on create; tighten files that already existed.
        set_permissions(path, 0o600).map_err(persist)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
