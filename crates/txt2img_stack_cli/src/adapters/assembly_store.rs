use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub trait AssemblyStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String>;

    /// Removes a previously written object. Missing objects are not an error.
    fn delete_object(&self, key: &str) -> Result<(), String>;
}

/// Writes cloud assembly files into a local directory (usually `cdk.out`).
pub struct DirectoryAssemblyStore {
    root: PathBuf,
}

impl DirectoryAssemblyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssemblyStore for DirectoryAssemblyStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        check_key(key)?;
        fs::create_dir_all(&self.root).map_err(|error| {
            format!(
                "failed to create assembly directory '{}': {error}",
                self.root.display()
            )
        })?;
        let path = self.root.join(key);
        fs::write(&path, body)
            .map_err(|error| format!("failed to write '{}': {error}", path.display()))
    }

    fn delete_object(&self, key: &str) -> Result<(), String> {
        check_key(key)?;
        let path = self.root.join(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(format!("failed to remove '{}': {error}", path.display())),
        }
    }
}

fn check_key(key: &str) -> Result<(), String> {
    if key.is_empty() || key.contains("..") || Path::new(key).is_absolute() {
        return Err(format!("refusing to touch assembly object outside root: '{key}'"));
    }
    Ok(())
}
