//! XML Normalizer (spec §4.2): tolerant parsing of UPnP device description
//! and SCPD documents into the domain types from `upnp-recon-core`.
//!
//! Namespace prefixes are a non-issue here: `roxmltree` resolves them during
//! parsing, so `tag_name().name()` already returns the local name regardless
//! of whatever prefix a vendor's document happens to use.

pub mod device;
pub mod scpd;

pub use device::parse_device_description;
pub use scpd::parse_scpd;
