use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Deserialize;
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::QueryError;

/// -1 asks the server to report whatever version it runs.
const JAVA_PROTOCOL_ANY: i32 = -1;
const JAVA_STATUS_STATE: i32 = 1;
const MAX_STATUS_LEN: i32 = 1 << 20;

const BEDROCK_PING: u8 = 0x01;
const BEDROCK_PONG: u8 = 0x1c;
const RAKNET_MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JavaStatus {
    pub version: Option<JavaVersion>,
    pub players: JavaPlayers,
    pub description: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JavaVersion {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JavaPlayers {
    pub max: u32,
    pub online: u32,
    #[serde(default)]
    pub sample: Vec<JavaPlayerSample>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JavaPlayerSample {
    pub name: String,
    pub id: Option<String>,
}

impl JavaStatus {
    /// The MOTD, which is either a plain string or a chat component.
    pub fn motd(&self) -> Option<String> {
        match self.description.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(obj) => obj.get("text").and_then(|t| t.as_str()).map(str::to_string),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BedrockStatus {
    pub edition: String,
    pub motd: String,
    pub version: String,
    pub online: u32,
    pub max: u32,
    pub level_name: Option<String>,
}

pub async fn java_status(addr: SocketAddr, timeout: Duration) -> Result<JavaStatus, QueryError> {
    tokio::time::timeout(timeout, java_status_exchange(addr))
        .await
        .map_err(|_| QueryError::Timeout)?
}

async fn java_status_exchange(addr: SocketAddr) -> Result<JavaStatus, QueryError> {
    let mut stream = TcpStream::connect(addr).await?;

    let host = addr.ip().to_string();
    let mut handshake = Vec::new();
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, JAVA_PROTOCOL_ANY);
    write_varint(&mut handshake, host.len() as i32);
    handshake.extend_from_slice(host.as_bytes());
    WriteBytesExt::write_u16::<BigEndian>(&mut handshake, addr.port())?;
    write_varint(&mut handshake, JAVA_STATUS_STATE);

    let mut packet = Vec::new();
    write_varint(&mut packet, handshake.len() as i32);
    packet.extend_from_slice(&handshake);
    // Status request: length 1, packet id 0
    packet.extend_from_slice(&[0x01, 0x00]);
    stream.write_all(&packet).await?;

    let _length = read_varint(&mut stream).await?;
    let packet_id = read_varint(&mut stream).await?;
    if packet_id != 0x00 {
        return Err(QueryError::Malformed(format!("unexpected status packet id {}", packet_id)));
    }
    let json_len = read_varint(&mut stream).await?;
    if !(0..=MAX_STATUS_LEN).contains(&json_len) {
        return Err(QueryError::Malformed(format!("status length {} out of range", json_len)));
    }

    let mut json = vec![0u8; json_len as usize];
    stream.read_exact(&mut json).await?;
    parse_java_status(&json)
}

pub fn parse_java_status(json: &[u8]) -> Result<JavaStatus, QueryError> {
    let value: serde_json::Value =
        serde_json::from_slice(json).map_err(|e| QueryError::Malformed(e.to_string()))?;

    if let Some(error) = value.get("error") {
        return Err(QueryError::ErrorResponse(error.to_string()));
    }
    serde_json::from_value(value).map_err(|e| QueryError::Malformed(e.to_string()))
}

pub async fn bedrock_status(addr: SocketAddr, timeout: Duration) -> Result<BedrockStatus, QueryError> {
    let bind: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let mut ping = vec![BEDROCK_PING];
    WriteBytesExt::write_i64::<BigEndian>(&mut ping, chrono::Utc::now().timestamp_millis())?;
    ping.extend_from_slice(&RAKNET_MAGIC);
    WriteBytesExt::write_u64::<BigEndian>(&mut ping, uuid::Uuid::new_v4().as_u64_pair().0)?;
    socket.send(&ping).await?;

    let mut buf = vec![0u8; 2048];
    let n = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| QueryError::Timeout)??;
    parse_bedrock_pong(&buf[..n])
}

pub fn parse_bedrock_pong(packet: &[u8]) -> Result<BedrockStatus, QueryError> {
    let mut cur = Cursor::new(packet);
    let id = ReadBytesExt::read_u8(&mut cur)?;
    if id != BEDROCK_PONG {
        return Err(QueryError::Malformed(format!("unexpected pong packet id 0x{:02x}", id)));
    }
    let _time = ReadBytesExt::read_i64::<BigEndian>(&mut cur)?;
    let _server_guid = ReadBytesExt::read_i64::<BigEndian>(&mut cur)?;
    let mut magic = [0u8; 16];
    std::io::Read::read_exact(&mut cur, &mut magic)?;
    if magic != RAKNET_MAGIC {
        return Err(QueryError::Malformed("bad RakNet magic".to_string()));
    }

    let len = ReadBytesExt::read_u16::<BigEndian>(&mut cur)? as usize;
    let start = cur.position() as usize;
    let raw = packet
        .get(start..start + len)
        .ok_or_else(|| QueryError::Malformed("server id string truncated".to_string()))?;
    let text = String::from_utf8_lossy(raw);

    // MCPE;motd;protocol;version;online;max;server id;level name;...
    let fields: Vec<&str> = text.split(';').collect();
    if fields.len() < 6 {
        return Err(QueryError::Malformed(format!("server id has {} fields", fields.len())));
    }
    let count = |field: &str| {
        field
            .parse::<u32>()
            .map_err(|_| QueryError::Malformed(format!("bad player count '{}'", field)))
    };

    Ok(BedrockStatus {
        edition: fields[0].to_string(),
        motd: fields[1].to_string(),
        version: fields[3].to_string(),
        online: count(fields[4])?,
        max: count(fields[5])?,
        level_name: fields.get(7).filter(|s| !s.is_empty()).map(|s| s.to_string()),
    })
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, QueryError> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let byte = AsyncReadExt::read_u8(reader).await?;
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(QueryError::Malformed("varint too long".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn pong(server_id: &str) -> Vec<u8> {
        let mut packet = vec![BEDROCK_PONG];
        WriteBytesExt::write_i64::<BigEndian>(&mut packet, 1).unwrap();
        WriteBytesExt::write_i64::<BigEndian>(&mut packet, 2).unwrap();
        packet.extend_from_slice(&RAKNET_MAGIC);
        WriteBytesExt::write_u16::<BigEndian>(&mut packet, server_id.len() as u16).unwrap();
        packet.extend_from_slice(server_id.as_bytes());
        packet
    }

    #[test]
    fn varint_encoding() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);

        let mut buf = Vec::new();
        write_varint(&mut buf, -1);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[tokio::test]
    async fn varint_decoding() {
        let mut data: &[u8] = &[0xAC, 0x02];
        assert_eq!(read_varint(&mut data).await.unwrap(), 300);
        let mut data: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
        assert_eq!(read_varint(&mut data).await.unwrap(), -1);
    }

    #[test]
    fn java_status_with_error_field_is_an_error() {
        let result = parse_java_status(br#"{"error":"server starting"}"#);
        assert!(matches!(result, Err(QueryError::ErrorResponse(_))));
    }

    #[test]
    fn java_status_without_players_is_malformed() {
        let result = parse_java_status(br#"{"version":{"name":"1.20.4"}}"#);
        assert!(matches!(result, Err(QueryError::Malformed(_))));
    }

    #[test]
    fn java_status_parses_sample_and_motd() {
        let status = parse_java_status(
            br#"{"version":{"name":"1.20.4","protocol":765},
                 "players":{"max":20,"online":2,"sample":[{"name":"steve","id":"abc"}]},
                 "description":{"text":"Hello"}}"#,
        )
        .unwrap();
        assert_eq!(status.players.online, 2);
        assert_eq!(status.players.sample[0].name, "steve");
        assert_eq!(status.motd().as_deref(), Some("Hello"));
    }

    #[test]
    fn bedrock_pong_fields() {
        let status = parse_bedrock_pong(&pong("MCPE;Dedicated Server;589;1.20.0;3;10;1234;Bedrock level;Survival;1;19132;19133;")).unwrap();
        assert_eq!(status.online, 3);
        assert_eq!(status.max, 10);
        assert_eq!(status.version, "1.20.0");
        assert_eq!(status.level_name.as_deref(), Some("Bedrock level"));
    }

    #[test]
    fn bedrock_pong_with_garbage_counts_is_malformed() {
        let result = parse_bedrock_pong(&pong("MCPE;motd;589;1.20.0;many;10"));
        assert!(matches!(result, Err(QueryError::Malformed(_))));
    }

    #[tokio::test]
    async fn java_status_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let handshake_len = read_varint(&mut socket).await.unwrap();
            let mut skip = vec![0u8; handshake_len as usize + 2];
            socket.read_exact(&mut skip).await.unwrap();

            let json = br#"{"players":{"max":8,"online":1}}"#;
            let mut body = Vec::new();
            write_varint(&mut body, 0x00);
            write_varint(&mut body, json.len() as i32);
            body.extend_from_slice(json);
            let mut reply = Vec::new();
            write_varint(&mut reply, body.len() as i32);
            reply.extend_from_slice(&body);
            socket.write_all(&reply).await.unwrap();
        });

        let status = java_status(addr, Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.players.online, 1);
        assert_eq!(status.players.max, 8);
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = java_status(addr, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(QueryError::Transport(_))));
    }
}
