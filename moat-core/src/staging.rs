//! Staging directory protocol: one fresh temp directory per active plugin,
//! written with the plugin's `StagedFile`s and mounted read-only into the
//! container at a well-known path (e.g. `/moat/claude-init`). Nothing here
//! persists across runs; the whole tree is removed on run end.

use crate::error::Result;
use crate::plugin::StagedFile;
use std::fs;
use std::path::{Path, PathBuf};

/// One populated staging directory for one plugin.
pub struct PluginStagingDir {
    pub provider: String,
    pub host_path: PathBuf,
}

/// Owns the per-run temp root; each plugin gets its own `<root>/<provider>-init`
/// subdirectory so two plugins never contend for the same files.
pub struct StagingRoot {
    dir: tempfile::TempDir,
    populated: Vec<PluginStagingDir>,
}

impl StagingRoot {
    pub fn new() -> Result<Self> {
        Ok(Self { dir: tempfile::tempdir()?, populated: Vec::new() })
    }

    fn plugin_dir(&self, provider: &str) -> PathBuf {
        self.dir.path().join(format!("{provider}-init"))
    }

    /// Write one plugin's staged files, mirroring `relative_path` exactly
    /// under the plugin's subdirectory, applying each file's mode bits.
    pub fn populate(&mut self, provider: &str, files: &[StagedFile]) -> Result<&Path> {
        let root = self.plugin_dir(provider);
        fs::create_dir_all(&root)?;
        for file in files {
            let path = root.join(&file.relative_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &file.contents)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(file.mode))?;
            }
        }
        self.populated.push(PluginStagingDir { provider: provider.to_string(), host_path: root });
        Ok(&self.populated.last().unwrap().host_path)
    }

    pub fn mounts(&self) -> &[PluginStagingDir] {
        &self.populated
    }

    /// In-container mount path convention, e.g. `/moat/claude-init`.
    pub fn container_mount_path(provider: &str) -> String {
        format!("/moat/{provider}-init")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::StagedFile;

    #[test]
    fn populate_mirrors_relative_paths_and_modes() {
        let mut root = StagingRoot::new().unwrap();
        let files = vec![
            StagedFile::credential_file(".credentials.json", br#"{"a":1}"#.to_vec()),
            StagedFile::config_file("settings.json", br#"{}"#.to_vec()),
        ];
        let dir = root.populate("claude", &files).unwrap().to_path_buf();
        assert!(dir.join(".credentials.json").exists());
        assert!(dir.join("settings.json").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let cred_mode = fs::metadata(dir.join(".credentials.json")).unwrap().permissions().mode() & 0o777;
            assert_eq!(cred_mode, 0o600);
            let cfg_mode = fs::metadata(dir.join("settings.json")).unwrap().permissions().mode() & 0o777;
            assert_eq!(cfg_mode, 0o644);
        }
    }

    #[test]
    fn two_plugins_get_isolated_subdirectories() {
        let mut root = StagingRoot::new().unwrap();
        root.populate("claude", &[StagedFile::config_file("settings.json", b"{}".to_vec())]).unwrap();
        root.populate("gemini", &[StagedFile::config_file("settings.json", b"{}".to_vec())]).unwrap();
        assert_eq!(root.mounts().len(), 2);
        assert_ne!(root.mounts()[0].host_path, root.mounts()[1].host_path);
    }

    #[test]
    fn container_mount_path_matches_convention() {
        assert_eq!(StagingRoot::container_mount_path("claude"), "/moat/claude-init");
    }

    #[test]
    fn dropping_root_removes_all_staged_files() {
        let path;
        {
            let mut root = StagingRoot::new().unwrap();
            let dir = root.populate("claude", &[StagedFile::config_file("x.json", b"{}".to_vec())]).unwrap();
            path = dir.to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
