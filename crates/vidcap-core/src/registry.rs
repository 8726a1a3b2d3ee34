//! Driver descriptor registry: two sections of ordinal-suffixed keys
//! (`msvideo`, `msvideo1`, ... `msvideo9`) mapping to descriptor strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Base key name for video driver slots.
pub const VIDEO_KEY_BASE: &str = "msvideo";

/// Number of descriptor slots scanned per section.
pub const MAX_VIDEO_DRIVERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Drivers served by the primary provider.
    Primary,
    /// Drivers loaded by descriptor through the legacy provider.
    Legacy,
}

impl Section {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "drivers32",
            Self::Legacy => "drivers",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "drivers32" => Some(Self::Primary),
            "drivers" => Some(Self::Legacy),
            _ => None,
        }
    }
}

/// Key for a descriptor slot: the base name, then for ordinal `n >= 1` the
/// single character `'1' + (n - 1)`.
pub fn slot_key(ordinal: usize) -> String {
    match ordinal {
        0 => VIDEO_KEY_BASE.to_string(),
        n => {
            let suffix = char::from(b'1' + (n - 1) as u8);
            format!("{VIDEO_KEY_BASE}{suffix}")
        }
    }
}

/// Where the gateway reads driver descriptors from.
pub trait DescriptorSource {
    /// The descriptor under `key`, or `None` when the key is absent or
    /// empty.
    fn lookup(&self, section: Section, key: &str) -> Option<String>;
}

/// In-memory registry, loadable from JSON or from `system.ini` text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverRegistry {
    #[serde(alias = "drivers32")]
    pub primary: BTreeMap<String, String>,
    #[serde(alias = "drivers")]
    pub legacy: BTreeMap<String, String>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn section_mut(&mut self, section: Section) -> &mut BTreeMap<String, String> {
        match section {
            Section::Primary => &mut self.primary,
            Section::Legacy => &mut self.legacy,
        }
    }

    fn section(&self, section: Section) -> &BTreeMap<String, String> {
        match section {
            Section::Primary => &self.primary,
            Section::Legacy => &self.legacy,
        }
    }

    pub fn insert(&mut self, section: Section, key: impl Into<String>, descriptor: impl Into<String>) {
        self.section_mut(section)
            .insert(key.into().to_ascii_lowercase(), descriptor.into());
    }

    /// Sets the descriptor for slot `ordinal` of `section`.
    pub fn with_slot(mut self, section: Section, ordinal: usize, descriptor: impl Into<String>) -> Self {
        self.insert(section, slot_key(ordinal), descriptor);
        self
    }

    /// Every descriptor in both sections.
    pub fn descriptors(&self) -> impl Iterator<Item = &str> {
        self.primary.values().chain(self.legacy.values()).map(String::as_str)
    }

    /// Parses `system.ini`-style text. Only the `[drivers]` and
    /// `[drivers32]` sections are kept; `;` starts a comment line.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        let mut current: Option<Section> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::Registry {
                    line: idx + 1,
                    reason: "unterminated section header".into(),
                })?;
                current = Section::from_name(name.trim());
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Registry {
                line: idx + 1,
                reason: "expected key=value".into(),
            })?;
            if let Some(section) = current {
                registry.insert(section, key.trim(), value.trim());
            }
        }

        Ok(registry)
    }
}

impl DescriptorSource for DriverRegistry {
    fn lookup(&self, section: Section, key: &str) -> Option<String> {
        self.section(section)
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_keys_use_single_digit_suffix() {
        assert_eq!(slot_key(0), "msvideo");
        assert_eq!(slot_key(1), "msvideo1");
        assert_eq!(slot_key(2), "msvideo2");
        assert_eq!(slot_key(9), "msvideo9");
    }

    #[test]
    fn parses_system_ini_sections() {
        let ini = "\
; capture drivers
[boot]
shell=progman.exe

[Drivers]
msvideo = vidsim.drv
MSVideo2=bt848.drv
wave=sndblst.drv

[drivers32]
msvideo=vidsim32.dll
";
        let registry = DriverRegistry::from_ini_str(ini).expect("valid ini");
        assert_eq!(registry.lookup(Section::Legacy, "msvideo").as_deref(), Some("vidsim.drv"));
        assert_eq!(registry.lookup(Section::Legacy, "msvideo2").as_deref(), Some("bt848.drv"));
        assert_eq!(registry.lookup(Section::Primary, "MSVIDEO").as_deref(), Some("vidsim32.dll"));
        assert_eq!(registry.lookup(Section::Legacy, "msvideo1"), None);
        assert_eq!(registry.lookup(Section::Legacy, "shell"), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = DriverRegistry::from_ini_str("[drivers]\nmsvideo\n").unwrap_err();
        assert!(matches!(err, ConfigError::Registry { line: 2, .. }));

        let err = DriverRegistry::from_ini_str("[drivers\n").unwrap_err();
        assert!(matches!(err, ConfigError::Registry { line: 1, .. }));
    }

    #[test]
    fn empty_values_read_as_absent() {
        let registry = DriverRegistry::new().with_slot(Section::Legacy, 0, "");
        assert_eq!(registry.lookup(Section::Legacy, "msvideo"), None);
    }

    #[test]
    fn deserializes_section_aliases() {
        let json = r#"{ "drivers": { "msvideo": "a.drv" }, "drivers32": { "msvideo": "b.dll" } }"#;
        let registry: DriverRegistry = serde_json::from_str(json).expect("valid registry");
        assert_eq!(registry.lookup(Section::Legacy, "msvideo").as_deref(), Some("a.drv"));
        assert_eq!(registry.lookup(Section::Primary, "msvideo").as_deref(), Some("b.dll"));
    }
}
