//! Bit-exact layouts of the native session directory buffers.
//!
//! Three buffers are decoded by this crate: the flattened level-1
//! enumeration record, the client-info structure, and the per-session
//! protocol-statistics structure. The two query structures reproduce the
//! native layout byte for byte, including alignment padding, so a buffer
//! returned by the directory service decodes directly. Encoding exists for
//! the in-memory backend and for structural-fidelity tests.
//!
//! All integers are little-endian; all text is UTF-16LE.

use crate::types::{AddressFamily, WtsError, WtsResult};
use chrono::{DateTime, FixedOffset, Utc};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The only enumeration level this crate speaks.
pub const SESSION_INFO_LEVEL: u32 = 1;

// Fixed character counts of the null-padded text fields, terminators
// included, as laid out by the native structures.
const CLIENT_NAME_CHARS: usize = 21;
const CLIENT_DOMAIN_CHARS: usize = 18;
const CLIENT_USER_CHARS: usize = 21;
const CLIENT_PATH_CHARS: usize = 261;
/// Length of the raw client address array, in 16-bit words.
pub const CLIENT_ADDRESS_WORDS: usize = 31;
const STATION_NAME_CHARS: usize = 32;
const STATS_DOMAIN_CHARS: usize = 17;
const STATS_USER_CHARS: usize = 21;

/// Total encoded size of the client-info buffer.
pub const CLIENT_INFO_LEN: usize = 2304;
/// Total encoded size of the protocol-stats buffer.
pub const SESSION_STATS_LEN: usize = 216;

// ─── Primitive readers ───────────────────────────────────────────────

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_i32(buf: &[u8], off: usize) -> i32 {
    read_u32(buf, off) as i32
}

fn read_i64(buf: &[u8], off: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    i64::from_le_bytes(bytes)
}

/// Write a string into a fixed-width wide field, truncating to leave room
/// for the terminator and zero-filling the remainder.
fn put_wide_fixed(out: &mut Vec<u8>, s: &str, chars: usize) {
    let mut written = 0usize;
    for unit in s.encode_utf16().take(chars - 1) {
        out.extend_from_slice(&unit.to_le_bytes());
        written += 1;
    }
    for _ in written..chars {
        out.extend_from_slice(&[0, 0]);
    }
}

fn read_wide_fixed(buf: &[u8], off: usize, chars: usize) -> String {
    let mut units = Vec::with_capacity(chars);
    for i in 0..chars {
        let unit = read_u16(buf, off + 2 * i);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16_lossy(&units)
}

/// Decode a NUL-terminated UTF-16 payload, e.g. a string attribute buffer.
pub fn decode_wide_string(buf: &[u8]) -> String {
    let mut units = Vec::with_capacity(buf.len() / 2);
    let mut off = 0;
    while off + 1 < buf.len() {
        let unit = read_u16(buf, off);
        if unit == 0 {
            break;
        }
        units.push(unit);
        off += 2;
    }
    String::from_utf16_lossy(&units)
}

/// Encode a string as NUL-terminated UTF-16LE bytes.
pub fn encode_wide_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((s.len() + 1) * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

// ─── Level-1 enumeration records ─────────────────────────────────────

/// One level-1 enumeration record, flattened at the backend boundary:
/// a 12-byte fixed header followed by five length-prefixed UTF-16 strings
/// (session name, host name, user name, domain name, farm name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSessionRecord {
    pub exec_env_id: u32,
    pub state: i32,
    pub session_id: u32,
    pub session_name: String,
    pub host_name: String,
    pub user_name: String,
    pub domain_name: String,
    pub farm_name: String,
}

impl RawSessionRecord {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.exec_env_id.to_le_bytes());
        out.extend_from_slice(&self.state.to_le_bytes());
        out.extend_from_slice(&self.session_id.to_le_bytes());
        for text in [
            &self.session_name,
            &self.host_name,
            &self.user_name,
            &self.domain_name,
            &self.farm_name,
        ] {
            let units: Vec<u16> = text.encode_utf16().collect();
            let count = units.len().min(u16::MAX as usize);
            out.extend_from_slice(&(count as u16).to_le_bytes());
            for unit in &units[..count] {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
    }

    fn decode_from(buf: &[u8], pos: &mut usize) -> WtsResult<Self> {
        let need = |ok: bool| -> WtsResult<()> {
            if ok {
                Ok(())
            } else {
                Err(WtsError::Decode {
                    buffer: "session enumeration",
                    detail: "record truncated".into(),
                })
            }
        };

        need(*pos + 12 <= buf.len())?;
        let exec_env_id = read_u32(buf, *pos);
        let state = read_i32(buf, *pos + 4);
        let session_id = read_u32(buf, *pos + 8);
        *pos += 12;

        let mut texts: [String; 5] = Default::default();
        for slot in &mut texts {
            need(*pos + 2 <= buf.len())?;
            let count = read_u16(buf, *pos) as usize;
            *pos += 2;
            need(*pos + 2 * count <= buf.len())?;
            let mut units = Vec::with_capacity(count);
            for i in 0..count {
                units.push(read_u16(buf, *pos + 2 * i));
            }
            *pos += 2 * count;
            *slot = String::from_utf16_lossy(&units);
        }

        let [session_name, host_name, user_name, domain_name, farm_name] = texts;
        Ok(Self {
            exec_env_id,
            state,
            session_id,
            session_name,
            host_name,
            user_name,
            domain_name,
            farm_name,
        })
    }
}

/// Serialize a run of enumeration records back to back.
pub fn encode_session_records(records: &[RawSessionRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        record.encode_into(&mut out);
    }
    out
}

/// Decode `count` enumeration records from a flattened buffer.
pub fn decode_session_records(buf: &[u8], count: u32) -> WtsResult<Vec<RawSessionRecord>> {
    let mut records = Vec::with_capacity(count as usize);
    let mut pos = 0usize;
    for _ in 0..count {
        records.push(RawSessionRecord::decode_from(buf, &mut pos)?);
    }
    Ok(records)
}

// ─── Client-info buffer ──────────────────────────────────────────────

/// The fixed-layout client-info structure, 2304 bytes once padding is
/// counted. Field order and alignment match the native definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawClientInfo {
    pub client_name: String,
    pub domain_name: String,
    pub user_name: String,
    pub work_directory: String,
    pub initial_program: String,
    pub encryption_level: u8,
    pub address_family: u32,
    pub address: [u16; CLIENT_ADDRESS_WORDS],
    pub h_res: u16,
    pub v_res: u16,
    pub color_depth: u16,
    pub client_directory: String,
    pub build_number: u32,
    pub hardware_id: u32,
    pub product_id: u16,
    pub out_buf_count_host: u16,
    pub out_buf_count_client: u16,
    pub out_buf_length: u16,
    pub device_id: String,
}

impl Default for RawClientInfo {
    fn default() -> Self {
        Self {
            client_name: String::new(),
            domain_name: String::new(),
            user_name: String::new(),
            work_directory: String::new(),
            initial_program: String::new(),
            encryption_level: 0,
            address_family: 0,
            address: [0; CLIENT_ADDRESS_WORDS],
            h_res: 0,
            v_res: 0,
            color_depth: 0,
            client_directory: String::new(),
            build_number: 0,
            hardware_id: 0,
            product_id: 0,
            out_buf_count_host: 0,
            out_buf_count_client: 0,
            out_buf_length: 0,
            device_id: String::new(),
        }
    }
}

impl RawClientInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CLIENT_INFO_LEN);
        put_wide_fixed(&mut out, &self.client_name, CLIENT_NAME_CHARS);
        put_wide_fixed(&mut out, &self.domain_name, CLIENT_DOMAIN_CHARS);
        put_wide_fixed(&mut out, &self.user_name, CLIENT_USER_CHARS);
        put_wide_fixed(&mut out, &self.work_directory, CLIENT_PATH_CHARS);
        put_wide_fixed(&mut out, &self.initial_program, CLIENT_PATH_CHARS);
        debug_assert_eq!(out.len(), 1164);
        out.push(self.encryption_level);
        // 3 bytes of padding align the address-family dword.
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&self.address_family.to_le_bytes());
        for word in &self.address {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&self.h_res.to_le_bytes());
        out.extend_from_slice(&self.v_res.to_le_bytes());
        out.extend_from_slice(&self.color_depth.to_le_bytes());
        put_wide_fixed(&mut out, &self.client_directory, CLIENT_PATH_CHARS);
        debug_assert_eq!(out.len(), 1762);
        // 2 bytes of padding align the build-number dword.
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.build_number.to_le_bytes());
        out.extend_from_slice(&self.hardware_id.to_le_bytes());
        out.extend_from_slice(&self.product_id.to_le_bytes());
        out.extend_from_slice(&self.out_buf_count_host.to_le_bytes());
        out.extend_from_slice(&self.out_buf_count_client.to_le_bytes());
        out.extend_from_slice(&self.out_buf_length.to_le_bytes());
        put_wide_fixed(&mut out, &self.device_id, CLIENT_PATH_CHARS);
        // Tail padding rounds the structure up to its 4-byte alignment.
        out.extend_from_slice(&[0, 0]);
        debug_assert_eq!(out.len(), CLIENT_INFO_LEN);
        out
    }

    pub fn decode(buf: &[u8]) -> WtsResult<Self> {
        if buf.len() < CLIENT_INFO_LEN {
            return Err(WtsError::Decode {
                buffer: "client info",
                detail: format!("{} bytes, expected {CLIENT_INFO_LEN}", buf.len()),
            });
        }
        let mut address = [0u16; CLIENT_ADDRESS_WORDS];
        for (i, word) in address.iter_mut().enumerate() {
            *word = read_u16(buf, 1172 + 2 * i);
        }
        Ok(Self {
            client_name: read_wide_fixed(buf, 0, CLIENT_NAME_CHARS),
            domain_name: read_wide_fixed(buf, 42, CLIENT_DOMAIN_CHARS),
            user_name: read_wide_fixed(buf, 78, CLIENT_USER_CHARS),
            work_directory: read_wide_fixed(buf, 120, CLIENT_PATH_CHARS),
            initial_program: read_wide_fixed(buf, 642, CLIENT_PATH_CHARS),
            encryption_level: buf[1164],
            address_family: read_u32(buf, 1168),
            address,
            h_res: read_u16(buf, 1234),
            v_res: read_u16(buf, 1236),
            color_depth: read_u16(buf, 1238),
            client_directory: read_wide_fixed(buf, 1240, CLIENT_PATH_CHARS),
            build_number: read_u32(buf, 1764),
            hardware_id: read_u32(buf, 1768),
            product_id: read_u16(buf, 1772),
            out_buf_count_host: read_u16(buf, 1774),
            out_buf_count_client: read_u16(buf, 1776),
            out_buf_length: read_u16(buf, 1778),
            device_id: read_wide_fixed(buf, 1780, CLIENT_PATH_CHARS),
        })
    }
}

// ─── Protocol-stats buffer ───────────────────────────────────────────

/// The fixed-layout session-info structure carrying protocol statistics
/// and the five raw UTC timestamps, 216 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSessionStats {
    pub state: i32,
    pub session_id: u32,
    pub incoming_bytes: u32,
    pub outgoing_bytes: u32,
    pub incoming_frames: u32,
    pub outgoing_frames: u32,
    pub incoming_compressed_bytes: u32,
    pub outgoing_compressed_bytes: u32,
    pub station_name: String,
    pub domain_name: String,
    pub user_name: String,
    pub connect_time_utc: i64,
    pub disconnect_time_utc: i64,
    pub last_input_time_utc: i64,
    pub logon_time_utc: i64,
    pub current_time_utc: i64,
}

impl RawSessionStats {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SESSION_STATS_LEN);
        out.extend_from_slice(&self.state.to_le_bytes());
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&self.incoming_bytes.to_le_bytes());
        out.extend_from_slice(&self.outgoing_bytes.to_le_bytes());
        out.extend_from_slice(&self.incoming_frames.to_le_bytes());
        out.extend_from_slice(&self.outgoing_frames.to_le_bytes());
        out.extend_from_slice(&self.incoming_compressed_bytes.to_le_bytes());
        out.extend_from_slice(&self.outgoing_compressed_bytes.to_le_bytes());
        put_wide_fixed(&mut out, &self.station_name, STATION_NAME_CHARS);
        put_wide_fixed(&mut out, &self.domain_name, STATS_DOMAIN_CHARS);
        put_wide_fixed(&mut out, &self.user_name, STATS_USER_CHARS);
        debug_assert_eq!(out.len(), 172);
        // 4 bytes of padding align the timestamp quadwords.
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&self.connect_time_utc.to_le_bytes());
        out.extend_from_slice(&self.disconnect_time_utc.to_le_bytes());
        out.extend_from_slice(&self.last_input_time_utc.to_le_bytes());
        out.extend_from_slice(&self.logon_time_utc.to_le_bytes());
        out.extend_from_slice(&self.current_time_utc.to_le_bytes());
        debug_assert_eq!(out.len(), SESSION_STATS_LEN);
        out
    }

    pub fn decode(buf: &[u8]) -> WtsResult<Self> {
        if buf.len() < SESSION_STATS_LEN {
            return Err(WtsError::Decode {
                buffer: "protocol stats",
                detail: format!("{} bytes, expected {SESSION_STATS_LEN}", buf.len()),
            });
        }
        Ok(Self {
            state: read_i32(buf, 0),
            session_id: read_u32(buf, 4),
            incoming_bytes: read_u32(buf, 8),
            outgoing_bytes: read_u32(buf, 12),
            incoming_frames: read_u32(buf, 16),
            outgoing_frames: read_u32(buf, 20),
            incoming_compressed_bytes: read_u32(buf, 24),
            outgoing_compressed_bytes: read_u32(buf, 28),
            station_name: read_wide_fixed(buf, 32, STATION_NAME_CHARS),
            domain_name: read_wide_fixed(buf, 96, STATS_DOMAIN_CHARS),
            user_name: read_wide_fixed(buf, 130, STATS_USER_CHARS),
            connect_time_utc: read_i64(buf, 176),
            disconnect_time_utc: read_i64(buf, 184),
            last_input_time_utc: read_i64(buf, 192),
            logon_time_utc: read_i64(buf, 200),
            current_time_utc: read_i64(buf, 208),
        })
    }
}

// ─── Time conversion ─────────────────────────────────────────────────

/// 100 ns ticks between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_EPOCH_DIFF: i64 = 116_444_736_000_000_000;

/// Convert a raw UTC FILETIME to local time under the offset in effect
/// right now. Applying today's offset rather than the offset at the
/// original instant deliberately ignores DST transitions in between,
/// matching what quser-style tooling displays. Zero means "no timestamp"
/// and any out-of-range value also yields `None`, never an error.
pub fn filetime_to_local(filetime: i64) -> Option<DateTime<FixedOffset>> {
    filetime_with_offset(filetime, current_utc_offset())
}

/// Deterministic variant used by the conversion tests.
pub(crate) fn filetime_with_offset(
    filetime: i64,
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    if filetime <= 0 {
        return None;
    }
    let unix_100ns = filetime.checked_sub(FILETIME_UNIX_EPOCH_DIFF)?;
    if unix_100ns < 0 {
        return None;
    }
    let secs = unix_100ns / 10_000_000;
    let nanos = ((unix_100ns % 10_000_000) * 100) as u32;
    let utc = DateTime::<Utc>::from_timestamp(secs, nanos)?;
    Some(utc.with_timezone(&offset))
}

fn current_utc_offset() -> FixedOffset {
    *chrono::Local::now().offset()
}

// ─── Client address ──────────────────────────────────────────────────

/// Build an IP address from the raw client address words: the low byte of
/// each of the first 4 (IPv4) or 16 (IPv6) words carries one octet. Any
/// other family, or a short array, yields `None`.
pub fn address_from_words(words: &[u16], family: AddressFamily) -> Option<IpAddr> {
    match family {
        AddressFamily::Ipv4 => {
            if words.len() < 4 {
                return None;
            }
            let mut octets = [0u8; 4];
            for (octet, word) in octets.iter_mut().zip(words) {
                *octet = (*word & 0xFF) as u8;
            }
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        AddressFamily::Ipv6 => {
            if words.len() < 16 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (octet, word) in octets.iter_mut().zip(words) {
                *octet = (*word & 0xFF) as u8;
            }
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
