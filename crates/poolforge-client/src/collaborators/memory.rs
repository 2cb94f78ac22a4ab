//! Job-id stores

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use super::JobIdStore;
use crate::error::Result;

/// Keeps the job id for the life of the process
#[derive(Debug, Default)]
pub struct MemoryJobIdStore {
    job_id: Mutex<Option<String>>,
}

impl MemoryJobIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that starts out holding `job_id`, as after a restart
    pub fn with_job_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Mutex::new(Some(job_id.into())),
        }
    }
}

impl JobIdStore for MemoryJobIdStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.job_id.lock().unwrap().clone())
    }

    fn save(&self, job_id: &str) -> Result<()> {
        *self.job_id.lock().unwrap() = Some(job_id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.job_id.lock().unwrap() = None;
        Ok(())
    }
}

/// Keeps the job id in a file so a restarted client can resume
#[derive(Debug, Clone)]
pub struct FileJobIdStore {
    path: PathBuf,
}

impl FileJobIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl JobIdStore for FileJobIdStore {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, job_id: &str) -> Result<()> {
        fs::write(&self.path, job_id)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryJobIdStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.save("job-1").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("job-1"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_new_instance() {
        let path = std::env::temp_dir().join(format!("poolforge-job-{}", uuid::Uuid::new_v4()));

        let store = FileJobIdStore::new(&path);
        assert_eq!(store.load().unwrap(), None);
        store.save("job-7").unwrap();

        let reopened = FileJobIdStore::new(&path);
        assert_eq!(reopened.load().unwrap().as_deref(), Some("job-7"));

        reopened.clear().unwrap();
        reopened.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
