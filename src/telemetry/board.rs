//! Board identity used for the discovery device block.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

pub const DEFAULT_MODEL: &str = "Jetson Nano";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardInfo {
    pub model: Option<String>,
    pub serial: Option<String>,
    /// L4T release, e.g. `32.7.1`.
    pub l4t_release: Option<String>,
}

impl BoardInfo {
    /// Read identity from the device tree and `/etc/nv_tegra_release` under
    /// `root`. Anything unreadable is left as `None`.
    pub fn detect(root: &Path) -> Self {
        let info = Self {
            model: read_device_tree(&root.join("proc/device-tree/model")),
            serial: read_device_tree(&root.join("proc/device-tree/serial-number")),
            l4t_release: fs::read_to_string(root.join("etc/nv_tegra_release"))
                .ok()
                .and_then(|s| parse_l4t_release(&s)),
        };
        log::debug!("board identity: {:?}", info);
        info
    }

    pub fn model_or_default(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }
}

/// Device-tree strings are NUL terminated.
fn read_device_tree(path: &Path) -> Option<String> {
    let raw = fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&raw);
    let value = text.trim_end_matches('\0').trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `# R32 (release), REVISION: 7.1, GCID: ...` becomes `32.7.1`.
pub fn parse_l4t_release(contents: &str) -> Option<String> {
    static RELEASE_RE: OnceLock<Regex> = OnceLock::new();
    let re = RELEASE_RE.get_or_init(|| {
        Regex::new(r"R(\d+) \(release\), REVISION: (\d+)\.(\d+)").unwrap()
    });
    let caps = re.captures(contents)?;
    Some(format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tegra_release_line() {
        let line = "# R32 (release), REVISION: 7.1, GCID: 29818004, BOARD: t210ref, EABI: aarch64";
        assert_eq!(parse_l4t_release(line).as_deref(), Some("32.7.1"));
        assert_eq!(parse_l4t_release("garbage"), None);
    }

    #[test]
    fn detects_from_fake_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("proc/device-tree")).unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(
            root.join("proc/device-tree/model"),
            b"NVIDIA Jetson Nano Developer Kit\0",
        )
        .unwrap();
        fs::write(root.join("proc/device-tree/serial-number"), b"1422019012345\0").unwrap();
        fs::write(
            root.join("etc/nv_tegra_release"),
            "# R32 (release), REVISION: 6.1, GCID: 1\n",
        )
        .unwrap();

        let info = BoardInfo::detect(root);
        assert_eq!(info.model.as_deref(), Some("NVIDIA Jetson Nano Developer Kit"));
        assert_eq!(info.serial.as_deref(), Some("1422019012345"));
        assert_eq!(info.l4t_release.as_deref(), Some("32.6.1"));
    }

    #[test]
    fn missing_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let info = BoardInfo::detect(dir.path());
        assert_eq!(info, BoardInfo::default());
        assert_eq!(info.model_or_default(), DEFAULT_MODEL);
    }
}
