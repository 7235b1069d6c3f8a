/// Error kinds surfaced uniformly across all engines (spec §7).
///
/// Discovery and Profiling never propagate these past their own call —
/// per-endpoint failures are collected into `parsing_errors`/discovery logs
/// instead (see `upnp-recon-discovery` and `upnp-recon-profiling`). Control
/// returns them directly to the caller.
#[derive(thiserror::Error, Debug)]
pub enum RconError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("TLS failure: {0}")]
    TlsFailure(String),

    #[error("HTTP status {code}")]
    HttpStatus { code: u16 },

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("SOAP fault {code}: {desc}{upnp}", upnp = upnp_code_suffix(*upnp_code))]
    SoapFault {
        code: String,
        desc: String,
        upnp_code: Option<u32>,
    },

    #[error("action not implemented for this protocol")]
    NotImplemented,

    #[error("operation canceled")]
    Canceled,
}

fn upnp_code_suffix(upnp_code: Option<u32>) -> String {
    match upnp_code {
        Some(c) => format!(" (UPnPError {c})"),
        None => String::new(),
    }
}

impl RconError {
    /// Whether retrying this error is ever appropriate. §7: retry only on
    /// `Timeout`, `NetworkUnreachable`, `HttpStatus{5xx}`, and transient SOAP
    /// faults; never on `InvalidArgument`, `UnknownAction`, or other 4xx.
    pub fn is_transient(&self) -> bool {
        match self {
            RconError::Timeout | RconError::NetworkUnreachable(_) => true,
            RconError::HttpStatus { code } => *code >= 500 || *code == 408,
            RconError::SoapFault { upnp_code, .. } => {
                matches!(upnp_code, Some(501) | Some(402) | Some(604))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RconError>;
