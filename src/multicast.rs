//! IPv4/IPv6 멀티캐스트 소켓
//!
//! - 패밀리별 옵션 이름 차이를 `IpOption` 매핑 테이블로 흡수
//! - 그룹 가입 전 SO_REUSEADDR / SO_REUSEPORT 설정 (한 호스트에 여러 수신자)
//! - drop 시 그룹 탈퇴 후 소켓 종료

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::{Error, Result};

/// 기본 IPv4 그룹
pub const DEFAULT_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 254);

/// 기본 IPv6 그룹 (interface-local)
pub const DEFAULT_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff01, 0, 0, 0, 0, 0, 0, 0x114);

/// 기본 포트
pub const DEFAULT_PORT: u16 = 50000;

/// 기본 TTL (링크 로컬)
pub const DEFAULT_TTL: u32 = 1;

/// 주소 문자열로 패밀리 추정 (':' 포함 시 IPv6)
pub fn address_family(addr: &str) -> Domain {
    if addr.contains(':') {
        Domain::IPV6
    } else {
        Domain::IPV4
    }
}

/// 소켓 패밀리
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn domain(self) -> Domain {
        match self {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        }
    }

    /// 와일드카드 주소
    pub fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// 주소의 패밀리
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl TryFrom<Domain> for Family {
    type Error = Error;

    fn try_from(domain: Domain) -> Result<Self> {
        if domain == Domain::IPV4 {
            Ok(Family::V4)
        } else if domain == Domain::IPV6 {
            Ok(Family::V6)
        } else {
            Err(Error::InvalidFamily(domain))
        }
    }
}

/// 패밀리 중립 IP 옵션
///
/// | 옵션             | IPv4                  | IPv6                 |
/// |------------------|-----------------------|----------------------|
/// | `MulticastTtl`   | IP_MULTICAST_TTL      | IPV6_MULTICAST_HOPS  |
/// | `MulticastLoop`  | IP_MULTICAST_LOOP     | IPV6_MULTICAST_LOOP  |
/// | `AddMembership`  | IP_ADD_MEMBERSHIP     | IPV6_JOIN_GROUP      |
/// | `DropMembership` | IP_DROP_MEMBERSHIP    | IPV6_LEAVE_GROUP     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpOption {
    MulticastTtl(u32),
    MulticastLoop(bool),
    AddMembership(IpAddr),
    DropMembership(IpAddr),
}

/// 멀티캐스트 UDP 소켓
#[derive(Debug)]
pub struct MulticastSocket {
    socket: UdpSocket,
    family: Family,
    /// 가입한 그룹 (소켓당 하나)
    group: Option<SocketAddr>,
}

impl MulticastSocket {
    /// 송신 전용 소켓 생성 (bind/가입 없음)
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn new(domain: Domain, ttl: u32, multicast_loop: bool) -> Result<Self> {
        let family = Family::try_from(domain)?;

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;

        let this = Self {
            socket,
            family,
            group: None,
        };
        this.set_ip_opt(IpOption::MulticastTtl(ttl))?;
        this.set_ip_opt(IpOption::MulticastLoop(multicast_loop))?;
        Ok(this)
    }

    /// 기본 옵션(TTL 1, loop-back 활성)으로 송신 전용 소켓 생성
    pub fn with_family(domain: Domain) -> Result<Self> {
        Self::new(domain, DEFAULT_TTL, true)
    }

    /// 그룹 주소 문자열과 포트로 소켓 생성, bind 및 그룹 가입
    ///
    /// 예: `MulticastSocket::join("ff01::114", 51234)`
    pub fn join(addr: &str, port: u16) -> Result<Self> {
        let group: IpAddr = addr
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        let mut socket = Self::with_family(address_family(addr))?;
        socket.join_group(group, port)?;
        Ok(socket)
    }

    /// bind 후 멀티캐스트 그룹 가입
    pub fn join_group(&mut self, group: IpAddr, port: u16) -> Result<()> {
        // 단순하게 소켓당 그룹 하나
        if let Some(joined) = self.group {
            return Err(Error::AlreadyJoined { group: joined.ip() });
        }
        if Family::of(&group) != self.family || !group.is_multicast() {
            return Err(Error::InvalidAddress(group.to_string()));
        }

        // 같은 호스트의 여러 소켓이 같은 그룹을 들을 수 있도록
        let sock = SockRef::from(&self.socket);
        sock.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        sock.set_reuse_port(true)?;

        let bind_addr = SocketAddr::new(self.family.unspecified(), port);
        sock.bind(&bind_addr.into())?;
        self.set_ip_opt(IpOption::AddMembership(group))?;

        // 가입 성공 후에만 기록 (drop 시 탈퇴 대상)
        self.group = Some(SocketAddr::new(group, port));
        debug!("멀티캐스트 그룹 가입: {}:{}", group, port);
        Ok(())
    }

    /// 그룹 탈퇴. 가입하지 않았거나 이미 탈퇴했으면 아무것도 하지 않음
    pub fn leave_group(&mut self) -> Result<()> {
        if let Some(group) = self.group.take() {
            self.set_ip_opt(IpOption::DropMembership(group.ip()))?;
            debug!("멀티캐스트 그룹 탈퇴: {}", group);
        }
        Ok(())
    }

    /// 패밀리에 맞는 IP 레벨 옵션 설정
    pub fn set_ip_opt(&self, opt: IpOption) -> Result<()> {
        let sock = SockRef::from(&self.socket);
        match (self.family, opt) {
            (Family::V4, IpOption::MulticastTtl(ttl)) => sock.set_multicast_ttl_v4(ttl)?,
            (Family::V6, IpOption::MulticastTtl(hops)) => sock.set_multicast_hops_v6(hops)?,
            (Family::V4, IpOption::MulticastLoop(on)) => sock.set_multicast_loop_v4(on)?,
            (Family::V6, IpOption::MulticastLoop(on)) => sock.set_multicast_loop_v6(on)?,
            (Family::V4, IpOption::AddMembership(IpAddr::V4(group))) => {
                sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?
            }
            (Family::V6, IpOption::AddMembership(IpAddr::V6(group))) => {
                sock.join_multicast_v6(&group, 0)?
            }
            (Family::V4, IpOption::DropMembership(IpAddr::V4(group))) => {
                sock.leave_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?
            }
            (Family::V6, IpOption::DropMembership(IpAddr::V6(group))) => {
                sock.leave_multicast_v6(&group, 0)?
            }
            (_, IpOption::AddMembership(group) | IpOption::DropMembership(group)) => {
                return Err(Error::InvalidAddress(group.to_string()))
            }
        }
        Ok(())
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// 가입한 그룹 (주소, 포트)
    pub fn group(&self) -> Option<SocketAddr> {
        self.group
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(buf, target).await?)
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// 타임아웃 수신. 타임아웃이면 `Ok(None)`
    pub async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Ok(Ok(received)) => Ok(Some(received)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for MulticastSocket {
    fn drop(&mut self) {
        if let Err(e) = self.leave_group() {
            warn!("멀티캐스트 그룹 탈퇴 실패: {}", e);
        }
        // 소켓은 필드 drop 시 닫힘
    }
}
