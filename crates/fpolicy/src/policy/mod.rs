//! Feature policy state for an inspected page.
//!
//! A page declares a policy for each feature it cares about; the browser
//! evaluates it into a [`PolicyRecord`] per feature. The user layers overrides
//! on top, and the [`PolicyStore`] keeps both sets apart so they can be merged
//! on demand and restored independently.
//!
//! ## Example
//!
//! ```rust
//! use fpolicy::policy::{AllowList, PolicyRecord, PolicyStore};
//!
//! let mut store = PolicyStore::new();
//! store.set_original_policies([PolicyRecord::original("usb", true, AllowList::all())]);
//!
//! let record = store.toggle("usb").unwrap();
//! assert!(!record.allowed);
//! assert_eq!(record.allow_list.to_string(), "'none'");
//! ```

mod record;
mod store;

pub use record::{AllowList, FeatureName, OriginToken, PolicyRecord};
pub use store::{PolicyError, PolicyStore, merge};
