use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::Context;
use bstr::BStr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

pub const SSDP_MULTICAST_IP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

pub const ST_ROOT_DEVICE: &str = "upnp:rootdevice";
pub const ST_ALL: &str = "ssdp:all";
pub const ST_DIAL: &str = "urn:dial-multiscreen-org:service:dial:1";

/// One parsed SSDP M-SEARCH response (spec §4.1 step 1).
#[derive(Debug, Clone)]
pub struct SsdpResponse {
    pub location: String,
    pub server: String,
    pub usn: String,
    pub search_target: String,
    pub received_from: SocketAddr,
}

fn make_search_request(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_IP}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: {search_target}\r\n\
         \r\n"
    )
}

fn parse_response(buf: &[u8], received_from: SocketAddr) -> anyhow::Result<SsdpResponse> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut resp = httparse::Response::new(&mut headers);
    resp.parse(buf).context("error parsing SSDP response")?;

    let mut location = None;
    let mut server = None;
    let mut usn = None;
    let mut st = None;

    for header in resp.headers.iter() {
        let value = std::str::from_utf8(header.value).unwrap_or_default();
        match header.name.to_ascii_uppercase().as_str() {
            "LOCATION" => location = Some(value.to_string()),
            "SERVER" => server = Some(value.to_string()),
            "USN" => usn = Some(value.to_string()),
            "ST" => st = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(SsdpResponse {
        location: location.context("missing LOCATION header")?,
        server: server.unwrap_or_default(),
        usn: usn.unwrap_or_default(),
        search_target: st.unwrap_or_default(),
        received_from,
    })
}

/// Bind a UDP socket to `bind_addr` and hand back a tokio socket, following
/// the teacher's `socket2`-then-convert dance so `SO_REUSEADDR` can be set.
fn bind_socket(bind_addr: SocketAddrV4) -> anyhow::Result<UdpSocket> {
    let sock = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None)
        .context("error creating socket")?;
    sock.set_reuse_address(true).context("SO_REUSEADDR")?;
    sock.bind(&bind_addr.into()).context("error binding")?;
    sock.set_nonblocking(true)?;
    UdpSocket::from_std(sock.into()).context("error converting to tokio socket")
}

/// Send an M-SEARCH for a single search target and collect replies until
/// `timeout` elapses. One socket per call so multiple search targets (spec
/// §4.1 step 1: `upnp:rootdevice`, `ssdp:all`, the DIAL service URN) run
/// concurrently without interfering. `bind_ip` pins the sending socket to a
/// specific interface (spec §4.1 step 1, §6: "to avoid routing surprises on
/// multi-homed hosts"); pass `Ipv4Addr::UNSPECIFIED` to let the OS pick.
pub async fn search_once(
    search_target: &str,
    timeout: Duration,
    bind_ip: Ipv4Addr,
    tx: UnboundedSender<SsdpResponse>,
) -> anyhow::Result<()> {
    let socket = bind_socket(SocketAddrV4::new(bind_ip, 0))?;
    let message = make_search_request(search_target);
    let dest = SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_IP, SSDP_PORT));

    socket
        .send_to(message.as_bytes(), dest)
        .await
        .with_context(|| format!("failed to send SSDP search for {search_target}"))?;

    let mut buf = [0u8; 4096];
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut done = false;

    while !done {
        tokio::select! {
            _ = &mut deadline, if !done => {
                done = true;
            }
            r = socket.recv_from(&mut buf), if !done => {
                match r {
                    Ok((len, addr)) => {
                        match parse_response(&buf[..len], addr) {
                            Ok(resp) => {
                                trace!(?resp, "received SSDP response");
                                if tx.send(resp).is_err() {
                                    done = true;
                                }
                            }
                            Err(e) => debug!(response = ?BStr::new(&buf[..len]), "failed to parse SSDP response: {e:#}"),
                        }
                    }
                    Err(e) => {
                        warn!("error receiving SSDP datagram: {e:#}");
                        done = true;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Run the three concurrent M-SEARCH sweeps from spec §4.1 step 1
/// (`upnp:rootdevice`, `ssdp:all`, DIAL) and collect every response, all
/// bound to `bind_ip`.
pub async fn search_all(timeout: Duration, bind_ip: Ipv4Addr) -> anyhow::Result<Vec<SsdpResponse>> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    async fn run_one(st: &'static str, timeout: Duration, bind_ip: Ipv4Addr, tx: UnboundedSender<SsdpResponse>) {
        if let Err(e) = search_once(st, timeout, bind_ip, tx).await {
            warn!(search_target = st, "SSDP search failed: {e:#}");
        }
    }

    let t1 = run_one(ST_ROOT_DEVICE, timeout, bind_ip, tx.clone());
    let t2 = run_one(ST_ALL, timeout, bind_ip, tx.clone());
    let t3 = run_one(ST_DIAL, timeout, bind_ip, tx.clone());
    drop(tx);

    let collect = async {
        let mut out = Vec::new();
        while let Some(resp) = rx.recv().await {
            out.push(resp);
        }
        out
    };

    let (_, _, _, responses) = tokio::join!(t1, t2, t3, collect);
    Ok(responses)
}
