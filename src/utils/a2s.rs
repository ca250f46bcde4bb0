use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::error::QueryError;

// Source engine query protocol (A2S). Single-packet responses only.
const SIMPLE_HEADER: i32 = -1;
const SPLIT_HEADER: i32 = -2;
const A2S_INFO: u8 = 0x54;
const A2S_PLAYER: u8 = 0x55;
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;
const S2A_PLAYER: u8 = 0x44;
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const MAX_PACKET: usize = 1400;

#[derive(Debug, Clone, PartialEq)]
pub struct A2sInfo {
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct A2sPlayer {
    pub name: String,
    pub score: i32,
    pub duration: f32,
}

pub async fn query_info(addr: SocketAddr, timeout: Duration) -> Result<A2sInfo, QueryError> {
    let socket = connect(addr).await?;

    let mut request = vec![0xFF, 0xFF, 0xFF, 0xFF, A2S_INFO];
    request.extend_from_slice(INFO_PAYLOAD);

    let mut response = exchange(&socket, &request, timeout).await?;
    let (kind, body) = strip_header(&response)?;
    if kind == S2C_CHALLENGE {
        // Newer servers want the challenge appended to the original request
        let challenge = read_challenge(body)?;
        request.extend_from_slice(&challenge);
        response = exchange(&socket, &request, timeout).await?;
    }

    let (kind, body) = strip_header(&response)?;
    if kind != S2A_INFO {
        return Err(QueryError::Malformed(format!("unexpected info response type 0x{:02x}", kind)));
    }
    parse_info(body)
}

pub async fn query_players(addr: SocketAddr, timeout: Duration) -> Result<Vec<A2sPlayer>, QueryError> {
    let socket = connect(addr).await?;

    let request = [0xFF, 0xFF, 0xFF, 0xFF, A2S_PLAYER, 0xFF, 0xFF, 0xFF, 0xFF];
    let mut response = exchange(&socket, &request, timeout).await?;
    let (kind, body) = strip_header(&response)?;
    if kind == S2C_CHALLENGE {
        let challenge = read_challenge(body)?;
        let mut retry = vec![0xFF, 0xFF, 0xFF, 0xFF, A2S_PLAYER];
        retry.extend_from_slice(&challenge);
        response = exchange(&socket, &retry, timeout).await?;
    }

    let (kind, body) = strip_header(&response)?;
    if kind != S2A_PLAYER {
        return Err(QueryError::Malformed(format!("unexpected player response type 0x{:02x}", kind)));
    }
    parse_players(body)
}

async fn connect(addr: SocketAddr) -> Result<UdpSocket, QueryError> {
    let bind: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

async fn exchange(socket: &UdpSocket, request: &[u8], timeout: Duration) -> Result<Vec<u8>, QueryError> {
    socket.send(request).await?;

    let mut buf = vec![0u8; MAX_PACKET];
    let n = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| QueryError::Timeout)??;
    buf.truncate(n);
    Ok(buf)
}

fn strip_header(packet: &[u8]) -> Result<(u8, &[u8]), QueryError> {
    if packet.len() < 5 {
        return Err(QueryError::Malformed("packet too short".to_string()));
    }
    let header = Cursor::new(&packet[..4]).read_i32::<LittleEndian>()?;
    match header {
        SIMPLE_HEADER => Ok((packet[4], &packet[5..])),
        SPLIT_HEADER => Err(QueryError::Malformed("split responses are not supported".to_string())),
        other => Err(QueryError::Malformed(format!("unknown packet header {}", other))),
    }
}

fn read_challenge(body: &[u8]) -> Result<[u8; 4], QueryError> {
    body.get(..4)
        .and_then(|c| <[u8; 4]>::try_from(c).ok())
        .ok_or_else(|| QueryError::Malformed("challenge too short".to_string()))
}

fn read_cstring(cur: &mut Cursor<&[u8]>) -> Result<String, QueryError> {
    let start = cur.position() as usize;
    let rest = cur
        .get_ref()
        .get(start..)
        .ok_or_else(|| QueryError::Malformed("string past end of packet".to_string()))?;
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| QueryError::Malformed("unterminated string".to_string()))?;
    let value = String::from_utf8_lossy(&rest[..len]).into_owned();
    cur.set_position((start + len + 1) as u64);
    Ok(value)
}

pub fn parse_info(body: &[u8]) -> Result<A2sInfo, QueryError> {
    let mut cur = Cursor::new(body);
    let _protocol = cur.read_u8()?;
    let name = read_cstring(&mut cur)?;
    let map = read_cstring(&mut cur)?;
    let folder = read_cstring(&mut cur)?;
    let game = read_cstring(&mut cur)?;
    let app_id = cur.read_u16::<LittleEndian>()?;
    let players = cur.read_u8()?;
    let max_players = cur.read_u8()?;
    let bots = cur.read_u8()?;
    let _server_type = cur.read_u8()?;
    let _environment = cur.read_u8()?;
    let _visibility = cur.read_u8()?;
    let _vac = cur.read_u8()?;
    let version = read_cstring(&mut cur).ok();

    Ok(A2sInfo {
        name,
        map,
        folder,
        game,
        app_id,
        players,
        max_players,
        bots,
        version,
    })
}

pub fn parse_players(body: &[u8]) -> Result<Vec<A2sPlayer>, QueryError> {
    let mut cur = Cursor::new(body);
    let count = cur.read_u8()?;

    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let _index = cur.read_u8()?;
        let name = read_cstring(&mut cur)?;
        let score = cur.read_i32::<LittleEndian>()?;
        let duration = cur.read_f32::<LittleEndian>()?;
        players.push(A2sPlayer { name, score, duration });
    }
    Ok(players)
}
