//! Kernel-backed [`Router`] querying the routing table over netlink.
//!
//! Uses `netlink-sys::Socket` for RTM_GETROUTE requests and a plain AF_INET
//! socket for the SIOCGIFNAME/SIOCGIFFLAGS ioctls used by the interface
//! resolver. Both sockets are opened inside the root network namespace.

use std::{
    io,
    mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    os::fd::{AsRawFd, OwnedFd, RawFd},
    path::Path,
    sync::Arc,
};

use netlink_packet_core::{NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::{
    AddressFamily as RtAddressFamily, RouteNetlinkMessage,
    route::{RouteAddress, RouteAttribute, RouteMessage},
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use nix::{
    net::if_::InterfaceFlags,
    sys::socket::{self, SockFlag, SockType},
};
use tracing::{debug, trace};

use crate::{
    error::RouteError,
    netns::{self, ROOT_PID},
    route::{
        Route, Router,
        iface::{DEFAULT_INTERFACE_CACHE_CAPACITY, InterfaceResolver},
    },
    stats::{self, Counter, Stats, StatsReporter},
};

/// Standard netlink receive buffer size
const RECV_BUFFER_SIZE: usize = 8192;

nix::ioctl_readwrite_bad!(ioctl_get_ifname, libc::SIOCGIFNAME, libc::ifreq);
nix::ioctl_readwrite_bad!(ioctl_get_ifflags, libc::SIOCGIFFLAGS, libc::ifreq);

/// Optional constraints on a kernel route query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteGetOptions {
    /// Source address of the packet being routed (RTA_SRC).
    pub source: Option<IpAddr>,
    /// Ingress interface the packet arrives on (RTA_IIF).
    pub iif: Option<u32>,
}

/// A route as returned by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRoute {
    pub gateway: Option<IpAddr>,
    /// Egress interface index (RTA_OIF).
    pub link_index: u32,
}

/// Kernel operations needed by [`NetlinkRouter`].
pub trait RouteHandle: Send {
    /// Asks the kernel which routes it would use to reach `dest`.
    fn route_get(&mut self, dest: IpAddr, opts: &RouteGetOptions) -> io::Result<Vec<KernelRoute>>;

    /// Resolves an interface index to its name (SIOCGIFNAME).
    fn interface_name(&self, index: u32) -> io::Result<String>;

    /// Reads the flags of the named interface (SIOCGIFFLAGS).
    fn interface_flags(&self, name: &str) -> io::Result<InterfaceFlags>;

    /// Releases the netlink route socket and the interface-control socket.
    /// Every later call fails with `EBADF`.
    fn close(&mut self);
}

/// Netlink and ioctl sockets bound to the namespace they were opened in.
pub struct NetlinkHandle {
    socket: Option<Socket>,
    ioctl_fd: Option<OwnedFd>,
    sequence: u32,
    buffer: Vec<u8>,
}

impl NetlinkHandle {
    /// Opens the netlink route socket and the ioctl socket in the calling
    /// thread's current network namespace.
    pub fn open() -> Result<Self, RouteError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(|e| RouteError::socket("netlink", e))?;
        socket
            .bind_auto()
            .map_err(|e| RouteError::socket("netlink", e))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| RouteError::socket("netlink", e))?;

        let ioctl_fd = socket::socket(
            socket::AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| RouteError::socket("ioctl", e))?;

        debug!(
            event.name = "netlink_handle.opened",
            ioctl_fd = ioctl_fd.as_raw_fd(),
            "opened netlink route and interface control sockets"
        );

        Ok(Self {
            socket: Some(socket),
            ioctl_fd: Some(ioctl_fd),
            sequence: 0,
            buffer: Vec::with_capacity(RECV_BUFFER_SIZE),
        })
    }

    fn ioctl_fd(&self) -> io::Result<RawFd> {
        self.ioctl_fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn send_request(&mut self, request: RouteMessage) -> io::Result<u32> {
        self.sequence = self.sequence.wrapping_add(1);

        let mut msg = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::GetRoute(request)),
        );
        msg.header.flags = NLM_F_REQUEST;
        msg.header.sequence_number = self.sequence;
        msg.finalize();

        let mut buf = vec![0u8; msg.header.length as usize];
        msg.serialize(&mut buf[..]);
        self.socket()?.send(&buf, 0)?;
        Ok(self.sequence)
    }

    /// Reads datagrams until the reply to `seq` shows up.
    fn recv_routes(&mut self, seq: u32) -> io::Result<Vec<KernelRoute>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        loop {
            self.buffer.clear();
            let n = socket.recv(&mut self.buffer, 0)?;
            if let Some(routes) = parse_routes(&self.buffer[..n], seq)? {
                return Ok(routes);
            }
        }
    }
}

/// Parses one datagram of RTM_GETROUTE replies.
///
/// Returns `None` when no message in the datagram answers `seq`, and the
/// collected routes otherwise. An NLMSG_ERROR carrying an errno answers with
/// that errno; an ACK (no errno) answers with whatever routes came before it.
fn parse_routes(bytes: &[u8], seq: u32) -> io::Result<Option<Vec<KernelRoute>>> {
    let mut routes = Vec::new();
    let mut answered = false;
    let mut offset = 0;
    while offset < bytes.len() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&bytes[offset..]).map_err(
            |e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("failed to parse netlink message: {e:?}"),
                )
            },
        )?;
        let msg_len = msg.header.length as usize;
        if msg_len == 0 {
            break;
        }
        offset += (msg_len + 3) & !3; // NLMSG_ALIGN

        if msg.header.sequence_number != seq {
            trace!(
                event.name = "netlink_handle.stale_reply",
                expected = seq,
                got = msg.header.sequence_number,
                "skipping netlink reply for another request"
            );
            continue;
        }
        answered = true;

        match msg.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
                routes.push(kernel_route(&route));
            }
            NetlinkPayload::Error(err) => {
                if let Some(code) = err.code {
                    return Err(io::Error::from_raw_os_error(-code.get()));
                }
            }
            _ => {}
        }
    }

    Ok(answered.then_some(routes))
}

impl RouteHandle for NetlinkHandle {
    fn route_get(&mut self, dest: IpAddr, opts: &RouteGetOptions) -> io::Result<Vec<KernelRoute>> {
        let seq = self.send_request(route_request(dest, opts))?;
        self.recv_routes(seq)
    }

    fn interface_name(&self, index: u32) -> io::Result<String> {
        let fd = self.ioctl_fd()?;
        // SAFETY: ifreq is plain old data; all-zero is a valid value.
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        ifr.ifr_ifru.ifru_ifindex = index as libc::c_int;

        // SAFETY: fd is an open socket and ifr outlives the call.
        unsafe { ioctl_get_ifname(fd, &mut ifr) }?;

        let name: Vec<u8> = ifr
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    fn interface_flags(&self, name: &str) -> io::Result<InterfaceFlags> {
        let fd = self.ioctl_fd()?;
        let bytes = name.as_bytes();
        if bytes.len() >= libc::IFNAMSIZ {
            return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        }

        // SAFETY: ifreq is plain old data; all-zero is a valid value.
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }

        // SAFETY: fd is an open socket and ifr outlives the call.
        unsafe { ioctl_get_ifflags(fd, &mut ifr) }?;

        // SAFETY: SIOCGIFFLAGS fills ifru_flags.
        let flags = unsafe { ifr.ifr_ifru.ifru_flags };
        Ok(InterfaceFlags::from_bits_truncate(
            flags as u16 as libc::c_int,
        ))
    }

    fn close(&mut self) {
        let socket = self.socket.take();
        if let Some(fd) = self.ioctl_fd.take() {
            debug!(
                event.name = "netlink_handle.closed",
                ioctl_fd = fd.as_raw_fd(),
                netlink_open = socket.is_some(),
                "closed netlink route and interface control sockets"
            );
        }
    }
}

fn prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn route_address(addr: IpAddr) -> RouteAddress {
    match addr {
        IpAddr::V4(a) => RouteAddress::Inet(a),
        IpAddr::V6(a) => RouteAddress::Inet6(a),
    }
}

/// Builds the RTM_GETROUTE payload for `dest`, the equivalent of
/// `ip route get <dest> from <source> iif <iif>`.
fn route_request(dest: IpAddr, opts: &RouteGetOptions) -> RouteMessage {
    let mut msg = RouteMessage::default();
    msg.header.address_family = match dest {
        IpAddr::V4(_) => RtAddressFamily::Inet,
        IpAddr::V6(_) => RtAddressFamily::Inet6,
    };
    msg.header.destination_prefix_length = prefix_len(&dest);
    msg.attributes
        .push(RouteAttribute::Destination(route_address(dest)));

    if let Some(source) = opts.source {
        msg.header.source_prefix_length = prefix_len(&source);
        msg.attributes
            .push(RouteAttribute::Source(route_address(source)));
    }
    if let Some(iif) = opts.iif {
        msg.attributes.push(RouteAttribute::Iif(iif));
    }
    msg
}

fn kernel_route(msg: &RouteMessage) -> KernelRoute {
    let mut route = KernelRoute {
        gateway: None,
        link_index: 0,
    };
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Gateway(RouteAddress::Inet(a)) => route.gateway = Some(IpAddr::V4(*a)),
            RouteAttribute::Gateway(RouteAddress::Inet6(a)) => route.gateway = Some(IpAddr::V6(*a)),
            RouteAttribute::Oif(index) => route.link_index = *index,
            _ => {}
        }
    }
    route
}

/// Counters for kernel queries and the interface cache.
#[derive(Debug, Default)]
pub struct NetlinkStats {
    pub(crate) netlink_lookups: Counter,
    pub(crate) netlink_errors: Counter,
    pub(crate) netlink_misses: Counter,

    pub(crate) if_cache_lookups: Counter,
    pub(crate) if_cache_misses: Counter,
    pub(crate) if_cache_size: Counter,
    pub(crate) if_cache_errors: Counter,
}

impl StatsReporter for NetlinkStats {
    fn report(&self) -> Stats {
        stats::collect([
            ("netlink_lookups", &self.netlink_lookups),
            ("netlink_errors", &self.netlink_errors),
            ("netlink_misses", &self.netlink_misses),
            ("if_cache_lookups", &self.if_cache_lookups),
            ("if_cache_misses", &self.if_cache_misses),
            ("if_cache_size", &self.if_cache_size),
            ("if_cache_errors", &self.if_cache_errors),
        ])
    }
}

/// [`Router`] backed by the kernel routing table.
///
/// Traffic from the root namespace is routed as-is. Traffic from any other
/// namespace most likely comes from a container, so the router first finds the
/// host interface carrying that source address and constrains the route query
/// to it.
pub struct NetlinkRouter<H = NetlinkHandle> {
    root_netns: u32,
    handle: H,
    interfaces: InterfaceResolver,
    stats: Arc<NetlinkStats>,
}

impl NetlinkRouter<NetlinkHandle> {
    /// Creates a router using the namespace of PID 1 under `proc_root` as the
    /// root namespace.
    pub fn new(proc_root: impl AsRef<Path>) -> Result<Self, RouteError> {
        Self::with_interface_capacity(proc_root, DEFAULT_INTERFACE_CACHE_CAPACITY)
    }

    pub fn with_interface_capacity(
        proc_root: impl AsRef<Path>,
        interface_capacity: usize,
    ) -> Result<Self, RouteError> {
        let proc_root = proc_root.as_ref();
        let root_netns = netns::netns_inode(proc_root, ROOT_PID)?;
        // sockets are namespace-scoped at creation time
        let handle = netns::with_root_ns(proc_root, NetlinkHandle::open)?;

        Ok(Self::with_handle(root_netns, handle, interface_capacity))
    }
}

impl<H: RouteHandle> NetlinkRouter<H> {
    pub fn with_handle(root_netns: u32, handle: H, interface_capacity: usize) -> Self {
        let stats = Arc::new(NetlinkStats::default());

        debug!(
            event.name = "netlink_router.initialized",
            root_netns = root_netns,
            if_cache_capacity = interface_capacity,
            "netlink router initialized"
        );

        Self {
            root_netns,
            handle,
            interfaces: InterfaceResolver::new(interface_capacity, Arc::clone(&stats)),
            stats,
        }
    }

    pub fn root_netns(&self) -> u32 {
        self.root_netns
    }
}

impl<H: RouteHandle> Router for NetlinkRouter<H> {
    fn route(&mut self, source: IpAddr, dest: IpAddr, netns: u32) -> Option<Route> {
        let mut iif = None;
        if netns != self.root_netns {
            let iface = self.interfaces.resolve(&mut self.handle, source, netns)?;
            if iface.index == 0 {
                return None;
            }
            // loopback routes must stay unconstrained or container-to-host traffic breaks
            if !iface.loopback {
                iif = Some(iface.index);
            }
        }

        self.stats.netlink_lookups.inc();
        let opts = RouteGetOptions {
            source: Some(source),
            iif,
        };
        let result = self.handle.route_get(dest, &opts);

        let routes = match result {
            Ok(routes) if routes.len() == 1 => routes,
            Ok(routes) => {
                self.stats.netlink_misses.inc();
                trace!(
                    event.name = "netlink_router.route_miss",
                    src = %source,
                    dst = %dest,
                    routes = routes.len(),
                    "could not get a single route"
                );
                return None;
            }
            Err(e) => {
                // no route came back either
                self.stats.netlink_errors.inc();
                self.stats.netlink_misses.inc();
                trace!(
                    event.name = "netlink_router.route_error",
                    src = %source,
                    dst = %dest,
                    error = %e,
                    "could not get route"
                );
                return None;
            }
        };

        let r = routes[0];
        trace!(
            event.name = "netlink_router.route_resolved",
            src = %source,
            dst = %dest,
            gw = ?r.gateway,
            ifindex = r.link_index,
            "resolved route"
        );

        Some(Route {
            gateway: r.gateway.unwrap_or(match dest {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }),
            ifindex: r.link_index,
        })
    }

    fn reporter(&self) -> Arc<dyn StatsReporter> {
        Arc::clone(&self.stats) as Arc<dyn StatsReporter>
    }

    fn close(&mut self) {
        self.handle.close();
    }
}
