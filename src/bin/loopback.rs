//! 멀티캐스트 루프백 데모
//!
//! 메모리 토렌트 하나를 시드로 두고 같은 호스트에서 두 송신 루프(무작위 / 순차)와
//! 수신 루프 하나를 돌린다. 수신측이 모든 피스를 받으면 종료한다.
//!
//! 사용법:
//!   cargo run --release --bin mcast-loopback -- [OPTIONS]
//!
//! 예시:
//!   # IPv6 기본 그룹 (ff01::114)
//!   cargo run --release --bin mcast-loopback
//!
//!   # IPv4 기본 그룹 (224.0.0.254), 4MB
//!   cargo run --release --bin mcast-loopback -- -4 --size 4194304

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mcast_torrent::multicast::{DEFAULT_GROUP_V4, DEFAULT_GROUP_V6, DEFAULT_PORT};
use mcast_torrent::{
    first_to_last_order, random_order, Alert, Config, Kind, MemoryTorrent, Session,
};

/// 데모 설정
struct DemoConfig {
    force_v4: bool,
    addr: Option<IpAddr>,
    port: u16,
    size: usize,
    piece_length: usize,
    blocks_per_second: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            force_v4: false,
            addr: None,
            port: DEFAULT_PORT,
            size: 1024 * 1024,
            piece_length: 256 * 1024,
            blocks_per_second: 200.0,
        }
    }
}

impl DemoConfig {
    fn group(&self) -> SocketAddr {
        let ip = self.addr.unwrap_or(if self.force_v4 {
            IpAddr::V4(DEFAULT_GROUP_V4)
        } else {
            IpAddr::V6(DEFAULT_GROUP_V6)
        });
        SocketAddr::new(ip, self.port)
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> T {
    match args.get(i + 1).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => value,
        _ => {
            eprintln!("{} 에 유효한 값이 필요합니다", name);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-4" => config.force_v4 = true,
            "--addr" | "-a" => {
                config.addr = Some(parse_value(&args, i, "--addr"));
                i += 1;
            }
            "--port" | "-p" => {
                config.port = parse_value(&args, i, "--port");
                i += 1;
            }
            "--size" | "-s" => {
                config.size = parse_value(&args, i, "--size");
                i += 1;
            }
            "--piece-length" => {
                config.piece_length = parse_value(&args, i, "--piece-length");
                i += 1;
            }
            "--rate" => {
                config.blocks_per_second = parse_value(&args, i, "--rate");
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"mcast-loopback - 멀티캐스트 피스 배포 루프백 데모

사용법:
  cargo run --release --bin mcast-loopback -- [OPTIONS]

옵션:
  -4                      IPv4 기본 그룹 사용 (기본: IPv6 ff01::114)
  -a, --addr <IP>         멀티캐스트 그룹 주소
  -p, --port <PORT>       포트 (기본: 50000)
  -s, --size <BYTES>      데이터 크기 (기본: 1048576)
  --piece-length <BYTES>  피스 길이 (기본: 262144)
  --rate <N>              송신 루프당 초당 블록 수 (기본: 200)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => warn!("알 수 없는 인자 무시: {}", other),
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let demo = parse_args();
    let group = demo.group();

    let config = Config {
        blocks_per_second: demo.blocks_per_second,
        ..Config::default().with_group(group.ip(), group.port())
    };

    info!("mcast-loopback starting...");
    info!("Group: {}", group);
    info!("Data size: {} bytes, piece length: {} bytes", demo.size, demo.piece_length);

    // 테스트용 데이터
    let data: Bytes = (0..demo.size)
        .map(|i| (i * 131 % 251) as u8)
        .collect::<Vec<u8>>()
        .into();

    // 송신 세션
    let send_session = Session::new(config.clone());
    send_session.on(Kind::Multicast, |alert: &Alert| info!("[send] {}", alert));
    let seed = Arc::new(MemoryTorrent::seeded(data.clone(), demo.piece_length, send_session.alerts()));

    // 수신 세션
    let recv_session = Session::new(config);
    recv_session.on(Kind::PieceFinished, |alert: &Alert| info!("[recv] {}", alert));
    recv_session.on(Kind::HashFailed, |alert: &Alert| warn!("[recv] {}", alert));
    recv_session.on(Kind::MulticastInvalid, |alert: &Alert| warn!("[recv] {}", alert));
    let torrent = Arc::new(seed.empty_like(recv_session.alerts()));

    let recv = recv_session.multicast_recv(torrent.clone(), group)?;
    let senders = [
        send_session.multicast_send(seed.clone(), group, random_order)?,
        send_session.multicast_send(seed.clone(), group, first_to_last_order)?,
    ];

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Exiting...");
                break;
            }
            _ = ticker.tick() => {
                if torrent.is_finished() {
                    info!(
                        "All {} pieces received in {:.2}s",
                        torrent.have_count(),
                        started.elapsed().as_secs_f64()
                    );
                    break;
                }
            }
        }
    }

    for send in senders {
        info!("[send] {}", send.stats().summary());
        send.shutdown().await?;
    }
    info!("[recv] {}", recv.stats().summary());
    recv.shutdown().await?;

    if torrent.is_finished() && torrent.content() != Some(data) {
        warn!("수신 데이터가 원본과 다릅니다");
    }

    Ok(())
}
