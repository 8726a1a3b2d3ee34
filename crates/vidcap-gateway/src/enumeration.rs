//! Device enumeration over the descriptor registry.
//!
//! Device indices cover the primary devices first, then the legacy slots.
//! Legacy slot 0 is dropped when it is a verbatim copy of primary slot 0
//! (installs that mirror the primary entry into the legacy section).
//! Legacy indices map onto slot ordinals directly, so an empty slot in the
//! middle leaves an index that cannot be opened.

use tracing::info;
use vidcap_core::registry::{slot_key, MAX_VIDEO_DRIVERS};
use vidcap_core::{DescriptorSource, DvError, DvResult, Section};

use crate::driver::ProviderKind;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    primary_slots: Vec<usize>,
    legacy_count: usize,
    legacy_alias: bool,
}

/// Where a device index lands in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub provider: ProviderKind,
    pub ordinal: usize,
}

impl Route {
    pub fn section(&self) -> Section {
        match self.provider {
            ProviderKind::Primary => Section::Primary,
            ProviderKind::Legacy => Section::Legacy,
        }
    }

    pub fn key(&self) -> String {
        slot_key(self.ordinal)
    }
}

impl Enumeration {
    pub fn scan(source: &dyn DescriptorSource) -> Self {
        let primary_slots: Vec<usize> = (0..MAX_VIDEO_DRIVERS)
            .filter(|&i| source.lookup(Section::Primary, &slot_key(i)).is_some())
            .collect();

        let primary_first = source.lookup(Section::Primary, &slot_key(0));
        let mut legacy_count = 0;
        let mut legacy_alias = false;
        for i in 0..MAX_VIDEO_DRIVERS {
            let Some(descriptor) = source.lookup(Section::Legacy, &slot_key(i)) else {
                continue;
            };
            if i == 0 && primary_first.as_deref() == Some(descriptor.as_str()) {
                legacy_alias = true;
            } else {
                legacy_count += 1;
            }
        }

        let enumeration = Self { primary_slots, legacy_count, legacy_alias };
        info!(
            "Enumerated {} video device(s): {} primary, {} legacy{}",
            enumeration.total(),
            enumeration.primary_count(),
            legacy_count,
            if legacy_alias { " (legacy slot 0 mirrors primary, skipped)" } else { "" }
        );
        enumeration
    }

    pub fn total(&self) -> usize {
        self.primary_slots.len() + self.legacy_count
    }

    pub fn primary_count(&self) -> usize {
        self.primary_slots.len()
    }

    pub fn legacy_alias(&self) -> bool {
        self.legacy_alias
    }

    pub fn route(&self, index: usize) -> DvResult<Route> {
        if index >= self.total() || index >= MAX_VIDEO_DRIVERS {
            return Err(DvError::BadDeviceId);
        }
        if let Some(&ordinal) = self.primary_slots.get(index) {
            return Ok(Route { provider: ProviderKind::Primary, ordinal });
        }
        let ordinal = index - self.primary_count() + usize::from(self.legacy_alias);
        if ordinal >= MAX_VIDEO_DRIVERS {
            return Err(DvError::BadDeviceId);
        }
        Ok(Route { provider: ProviderKind::Legacy, ordinal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidcap_core::DriverRegistry;

    #[test]
    fn empty_registry_has_no_devices() {
        let e = Enumeration::scan(&DriverRegistry::new());
        assert_eq!(e.total(), 0);
        assert_eq!(e.route(0), Err(DvError::BadDeviceId));
    }

    #[test]
    fn primary_devices_come_first() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Primary, 0, "a32.dll")
            .with_slot(Section::Primary, 3, "b32.dll")
            .with_slot(Section::Legacy, 1, "c.drv");
        let e = Enumeration::scan(&registry);
        assert_eq!(e.total(), 3);
        assert_eq!(e.route(0), Ok(Route { provider: ProviderKind::Primary, ordinal: 0 }));
        assert_eq!(e.route(1), Ok(Route { provider: ProviderKind::Primary, ordinal: 3 }));
        assert_eq!(e.route(2), Ok(Route { provider: ProviderKind::Legacy, ordinal: 0 }));
    }

    #[test]
    fn mirrored_slot_zero_is_excluded() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Primary, 0, "vidsim32.dll")
            .with_slot(Section::Legacy, 0, "vidsim32.dll")
            .with_slot(Section::Legacy, 1, "bt848.drv");
        let e = Enumeration::scan(&registry);

        // three raw slots, one of them a mirror
        assert_eq!(e.total(), 2);
        assert!(e.legacy_alias());
        let route = e.route(1).unwrap();
        assert_eq!(route.provider, ProviderKind::Legacy);
        assert_eq!(route.ordinal, 1);
        assert_eq!(route.key(), "msvideo1");
    }

    #[test]
    fn differing_slot_zero_is_counted() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Primary, 0, "vidsim32.dll")
            .with_slot(Section::Legacy, 0, "vidsim.drv");
        let e = Enumeration::scan(&registry);
        assert_eq!(e.total(), 2);
        assert!(!e.legacy_alias());
        assert_eq!(e.route(1).unwrap().ordinal, 0);
    }

    #[test]
    fn legacy_gaps_keep_slot_ordinals() {
        let registry = DriverRegistry::new()
            .with_slot(Section::Legacy, 0, "a.drv")
            .with_slot(Section::Legacy, 2, "b.drv");
        let e = Enumeration::scan(&registry);
        assert_eq!(e.total(), 2);
        // index 1 names slot 1, which is empty
        assert_eq!(e.route(1).unwrap().key(), "msvideo1");
        assert_eq!(e.route(2), Err(DvError::BadDeviceId));
    }
}
