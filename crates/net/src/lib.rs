//! Network Probe (spec §4's leaf component): UDP multicast SSDP, TCP connect
//! sweeping, and an HTTP fetcher with stealth identity rotation.

pub mod http;
pub mod ssdp;
pub mod tcp;

pub use http::{build_client, fetch_text, pick_user_agent, stealth_jitter, FetchOptions};
pub use ssdp::{search_all, search_once, SsdpResponse};
pub use tcp::{hosts_in_cidr, sweep_open_ports};
