//! Profile Store and Profile Matcher (spec §4.5, §6): an immutable catalog
//! of vendor profiles and the substring-scoring algorithm that ranks them
//! against a discovered `Device`.

pub mod matcher;
pub mod store;
pub mod types;

pub use matcher::{match_device, ScoredProfile};
pub use store::ProfileStore;
pub use types::{
    CastEndpoint, DeviceProfile, EcpEndpoint, GenericEndpoint, HeosEndpoint, MatchCriteria,
    UpnpEndpoint, WamCommand, WamEndpoint,
};
