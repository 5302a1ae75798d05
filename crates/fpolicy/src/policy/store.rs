//! Per-tab policy state: the page's original policies and the user's overrides.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::{FeatureName, PolicyRecord};

/// Errors from policy store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The feature is neither declared by the page nor supported by the browser.
    #[error("unknown feature: {0}")]
    InvalidFeature(FeatureName),
}

/// Merge overrides on top of original records.
///
/// Every feature of `original` appears in the result, taking the override's
/// record when one exists. Overrides for features the page never reported are
/// not part of the merge.
pub fn merge(
    original: &BTreeMap<FeatureName, PolicyRecord>,
    overrides: &BTreeMap<FeatureName, PolicyRecord>,
) -> BTreeMap<FeatureName, PolicyRecord> {
    original
        .iter()
        .map(|(name, record)| (name.clone(), overrides.get(name).unwrap_or(record).clone()))
        .collect()
}

/// Original and customized policies of one inspected page.
///
/// The store is built by the panel and shipped to the background process as a
/// snapshot, so it is a plain serializable value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStore {
    #[serde(default)]
    supported: BTreeSet<FeatureName>,
    #[serde(default)]
    original: BTreeMap<FeatureName, PolicyRecord>,
    #[serde(default)]
    overrides: BTreeMap<FeatureName, PolicyRecord>,
}

impl PolicyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the features the browser reports as supported.
    pub fn set_supported_features(&mut self, features: impl IntoIterator<Item = FeatureName>) {
        self.supported = features.into_iter().collect();
        if self.supported.is_empty() {
            tracing::warn!("browser reported no supported feature policies");
        }
    }

    /// Features supported by the browser, sorted.
    pub fn supported_features(&self) -> impl Iterator<Item = &FeatureName> {
        self.supported.iter()
    }

    /// Replace the original policy set.
    ///
    /// Overrides are kept. Records are stored as non-customized regardless of
    /// their incoming flag; a later record for the same feature wins.
    pub fn set_original_policies(&mut self, records: impl IntoIterator<Item = PolicyRecord>) {
        self.original = records
            .into_iter()
            .map(|mut record| {
                record.customized = false;
                (record.feature.clone(), record)
            })
            .collect();
    }

    /// Add original records for features the set does not have yet.
    ///
    /// Existing records are kept, so an evaluation taken while overrides are
    /// in effect cannot replace the page's own declaration. An empty set is
    /// filled completely.
    pub fn fill_original_policies(&mut self, records: impl IntoIterator<Item = PolicyRecord>) {
        for mut record in records {
            if let Entry::Vacant(slot) = self.original.entry(record.feature.clone()) {
                record.customized = false;
                slot.insert(record);
            }
        }
    }

    /// The page's original policies, sorted by feature.
    pub fn original(&self) -> &BTreeMap<FeatureName, PolicyRecord> {
        &self.original
    }

    /// The user's overrides, sorted by feature.
    pub fn overrides(&self) -> &BTreeMap<FeatureName, PolicyRecord> {
        &self.overrides
    }

    /// Returns true if the user has overridden the feature.
    pub fn is_customized(&self, feature: &str) -> bool {
        self.overrides.contains_key(feature)
    }

    /// Flip the allowed state of a feature.
    ///
    /// An existing override is flipped in place. Otherwise a new override is
    /// seeded from the negation of the page's record, or as disallowed when
    /// the page reported nothing for a browser-supported feature.
    pub fn toggle(&mut self, feature: &str) -> Result<&PolicyRecord, PolicyError> {
        let allowed = match self.overrides.get(feature) {
            Some(existing) => !existing.allowed,
            None => match self.original.get(feature) {
                Some(original) => !original.allowed,
                None if self.supported.contains(feature) => false,
                None => return Err(PolicyError::InvalidFeature(feature.into())),
            },
        };

        tracing::debug!(feature = %feature, allowed, "toggled feature policy");
        Ok(self.put_override(feature, allowed))
    }

    /// Override a feature with an explicit allowed state.
    pub fn set_override(
        &mut self,
        feature: &str,
        allowed: bool,
    ) -> Result<&PolicyRecord, PolicyError> {
        let known = self.overrides.contains_key(feature)
            || self.original.contains_key(feature)
            || self.supported.contains(feature);
        if !known {
            return Err(PolicyError::InvalidFeature(feature.into()));
        }
        Ok(self.put_override(feature, allowed))
    }

    fn put_override(&mut self, feature: &str, allowed: bool) -> &PolicyRecord {
        let record = PolicyRecord::customized(feature, allowed);
        match self.overrides.entry(record.feature.clone()) {
            Entry::Occupied(mut slot) => {
                slot.insert(record);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(record),
        }
    }

    /// Drop every override. The page must be reloaded for headers to follow.
    pub fn restore(&mut self) {
        self.overrides.clear();
    }

    /// Drop every override and the original set so both are recaptured.
    pub fn reset(&mut self) {
        self.overrides.clear();
        self.original.clear();
    }

    /// The effective policy of every feature the page reported.
    pub fn effective(&self) -> BTreeMap<FeatureName, PolicyRecord> {
        merge(&self.original, &self.overrides)
    }

    /// The records the header rewriter applies on top of the page's header.
    ///
    /// Only customized records are emitted; uncustomized ones already come
    /// from the page's own header.
    pub fn header_overrides(&self) -> impl Iterator<Item = &PolicyRecord> {
        self.overrides.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::record::AllowList;

    fn store() -> PolicyStore {
        let mut store = PolicyStore::new();
        store.set_supported_features(
            ["camera", "geolocation", "usb"]
                .into_iter()
                .map(FeatureName::from),
        );
        store.set_original_policies([
            PolicyRecord::original("geolocation", true, AllowList::parse("'self'")),
            PolicyRecord::original("usb", true, AllowList::all()),
        ]);
        store
    }

    #[test]
    fn test_toggle_seeds_from_original() {
        let mut store = store();

        let record = store.toggle("usb").unwrap();
        assert!(!record.allowed);
        assert!(record.customized);
        assert_eq!(record.allow_list, AllowList::none());
    }

    #[test]
    fn test_toggle_twice_restores_allowed() {
        let mut store = store();

        store.toggle("geolocation").unwrap();
        let record = store.toggle("geolocation").unwrap().clone();

        assert_eq!(record.allowed, store.original()["geolocation"].allowed);
        assert_eq!(record.allow_list, AllowList::all());
        // The override stays until restore
        assert!(store.is_customized("geolocation"));
    }

    #[test]
    fn test_toggle_supported_feature_without_original() {
        let mut store = store();

        let record = store.toggle("camera").unwrap();
        assert!(!record.allowed);
        assert_eq!(record.allow_list, AllowList::none());
    }

    #[test]
    fn test_toggle_unknown_feature_fails() {
        let mut store = store();
        let before = store.clone();

        assert_eq!(
            store.toggle("teleport"),
            Err(PolicyError::InvalidFeature("teleport".into()))
        );
        assert_eq!(store, before);
    }

    #[test]
    fn test_set_override() {
        let mut store = store();

        let record = store.set_override("camera", true).unwrap();
        assert!(record.allowed);
        assert_eq!(record.allow_list, AllowList::all());

        assert!(store.set_override("teleport", true).is_err());
    }

    #[test]
    fn test_effective_prefers_overrides() {
        let mut store = store();
        store.toggle("usb").unwrap();

        let effective = store.effective();
        assert_eq!(effective["usb"], store.overrides()["usb"]);
        assert_eq!(effective["geolocation"], store.original()["geolocation"]);
    }

    #[test]
    fn test_effective_excludes_undeclared_overrides() {
        let mut store = store();
        store.toggle("camera").unwrap();

        assert!(!store.effective().contains_key("camera"));
        assert_eq!(store.header_overrides().count(), 1);
    }

    #[test]
    fn test_effective_is_sorted() {
        let mut store = PolicyStore::new();
        store.set_original_policies([
            PolicyRecord::declared("usb", AllowList::all()),
            PolicyRecord::declared("autoplay", AllowList::all()),
            PolicyRecord::declared("camera", AllowList::none()),
        ]);

        let names: Vec<_> = store.effective().into_keys().collect();
        assert_eq!(
            names,
            vec![
                FeatureName::from("autoplay"),
                FeatureName::from("camera"),
                FeatureName::from("usb"),
            ]
        );
    }

    #[test]
    fn test_restore_clears_overrides_only() {
        let mut store = store();
        store.toggle("usb").unwrap();
        store.toggle("camera").unwrap();

        store.restore();

        assert!(store.overrides().is_empty());
        assert_eq!(&store.effective(), store.original());
    }

    #[test]
    fn test_reset_clears_original() {
        let mut store = store();
        store.toggle("usb").unwrap();

        store.reset();

        assert!(store.overrides().is_empty());
        assert!(store.original().is_empty());
        // Supported features survive so toggles keep validating
        assert_eq!(store.supported_features().count(), 3);
    }

    #[test]
    fn test_set_original_keeps_overrides() {
        let mut store = store();
        store.toggle("usb").unwrap();

        store.set_original_policies([PolicyRecord::original("usb", false, AllowList::none())]);

        assert!(store.is_customized("usb"));
        assert!(!store.original()["usb"].customized);
    }

    #[test]
    fn test_fill_original_keeps_captured_records() {
        let mut store = store();
        store.toggle("usb").unwrap();

        store.fill_original_policies([
            PolicyRecord::original("usb", false, AllowList::none()),
            PolicyRecord::original("camera", false, AllowList::none()),
        ]);

        assert!(store.original()["usb"].allowed);
        assert_eq!(store.original()["usb"].allow_list, AllowList::all());
        assert!(!store.original()["camera"].allowed);

        store.reset();
        store.fill_original_policies([PolicyRecord::customized("usb", false)]);
        assert!(!store.original()["usb"].allowed);
        assert!(!store.original()["usb"].customized);
    }

    #[test]
    fn test_set_original_forces_uncustomized() {
        let mut store = PolicyStore::new();
        store.set_original_policies([PolicyRecord::customized("usb", true)]);

        assert!(!store.original()["usb"].customized);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = store();
        store.toggle("usb").unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let back: PolicyStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
