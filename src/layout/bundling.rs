//! Target platforms and the bundling restrictions a plugin can declare.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;

/// Operating system family a distribution is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OsFamily {
    Windows,
    MacOs,
    Linux,
}

impl OsFamily {
    pub const ALL: [OsFamily; 3] = [OsFamily::Windows, OsFamily::MacOs, OsFamily::Linux];

    /// Short name used in directory names (`dist.<os>.<arch>`).
    pub fn dist_suffix(self) -> &'static str {
        match self {
            OsFamily::Windows => "win",
            OsFamily::MacOs => "mac",
            OsFamily::Linux => "linux",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dist_suffix())
    }
}

impl FromStr for OsFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "win" | "windows" => Ok(OsFamily::Windows),
            "mac" | "macos" | "osx" => Ok(OsFamily::MacOs),
            "linux" => Ok(OsFamily::Linux),
            other => bail!("unsupported os '{}' (expected 'windows', 'macos' or 'linux')", other),
        }
    }
}

/// CPU architecture a distribution is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    X64,
    Aarch64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::X64, Arch::Aarch64];

    pub fn dist_suffix(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dist_suffix())
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Ok(Arch::X64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => bail!("unsupported arch '{}' (expected 'x64' or 'aarch64')", other),
        }
    }
}

/// One OS/arch combination the build produces plugin sets for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub os: OsFamily,
    pub arch: Arch,
}

impl Target {
    /// Directory name for OS/arch-specific output, e.g. `dist.linux.x64`.
    pub fn dist_dir_name(self) -> String {
        format!("dist.{}.{}", self.os, self.arch)
    }
}

/// Where a plugin may be bundled.
///
/// An empty OS or arch list is treated as "all". A plugin restricted to a
/// subset of operating systems is only bundled into the matching
/// OS-specific plugin directories, never into the generic one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BundlingRestrictions {
    pub supported_os: Vec<OsFamily>,
    pub supported_arch: Vec<Arch>,
    pub include_in_eap_only: bool,
}

impl BundlingRestrictions {
    fn all_os(&self) -> bool {
        self.supported_os.is_empty() || OsFamily::ALL.iter().all(|os| self.supported_os.contains(os))
    }

    fn all_arch(&self) -> bool {
        self.supported_arch.is_empty()
            || Arch::ALL.iter().all(|arch| self.supported_arch.contains(arch))
    }

    /// True when the plugin carries no OS or arch restriction.
    pub fn is_generic(&self) -> bool {
        self.all_os() && self.all_arch()
    }

    /// Decide whether a plugin goes into the plugin set for `target`.
    ///
    /// `None` asks about the generic, OS-independent plugin directory.
    pub fn satisfied_by(&self, target: Option<Target>, is_eap: bool) -> bool {
        if self.include_in_eap_only && !is_eap {
            return false;
        }
        match target {
            None => self.is_generic(),
            Some(target) => {
                if self.all_os() || !self.supported_os.contains(&target.os) {
                    return false;
                }
                self.all_arch() || self.supported_arch.contains(&target.arch)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_x64() -> Target {
        Target {
            os: OsFamily::Linux,
            arch: Arch::X64,
        }
    }

    #[test]
    fn test_generic_plugin_only_goes_to_common_dir() {
        let generic = BundlingRestrictions::default();
        assert!(generic.satisfied_by(None, false));
        assert!(!generic.satisfied_by(Some(linux_x64()), false));
    }

    #[test]
    fn test_os_specific_plugin() {
        let linux_only = BundlingRestrictions {
            supported_os: vec![OsFamily::Linux],
            ..Default::default()
        };
        assert!(!linux_only.satisfied_by(None, false));
        assert!(linux_only.satisfied_by(Some(linux_x64()), false));
        assert!(!linux_only.satisfied_by(
            Some(Target {
                os: OsFamily::Windows,
                arch: Arch::X64
            }),
            false
        ));

        let linux_arm = BundlingRestrictions {
            supported_os: vec![OsFamily::Linux],
            supported_arch: vec![Arch::Aarch64],
            ..Default::default()
        };
        assert!(!linux_arm.satisfied_by(Some(linux_x64()), false));
    }

    #[test]
    fn test_eap_only_plugin() {
        let eap = BundlingRestrictions {
            include_in_eap_only: true,
            ..Default::default()
        };
        assert!(!eap.satisfied_by(None, false));
        assert!(eap.satisfied_by(None, true));
    }

    #[test]
    fn test_parse_target_names() {
        assert_eq!("macos".parse::<OsFamily>().unwrap(), OsFamily::MacOs);
        assert_eq!("arm64".parse::<Arch>().unwrap(), Arch::Aarch64);
        assert!("beos".parse::<OsFamily>().is_err());
        assert_eq!(linux_x64().dist_dir_name(), "dist.linux.x64");
    }
}
