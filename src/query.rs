//! Per-session information queries.
//!
//! Every query obtains a directory-allocated buffer, decodes it under a
//! [`BufferGuard`], and releases it on all paths. Client-info and
//! protocol-stats queries surface protocol errors; the generic string
//! query is used for optional enrichment and reports a miss as `None`.

use crate::codec::{self, RawClientInfo, RawSessionStats};
use crate::directory::{BufferGuard, HostHandle, InfoClass, SessionDirectory};
use crate::types::{AddressFamily, ClientInfo, SessionState, SessionStats, WtsError, WtsResult};

/// Fetch and decode the client attributes of one session.
pub fn query_client_info<D: SessionDirectory>(
    handle: &HostHandle<D>,
    session_id: u32,
) -> WtsResult<ClientInfo> {
    let dir = handle.directory();
    let buffer = dir.query_session(handle.raw(), session_id, InfoClass::ClientInfo)?;
    let guard = BufferGuard::single(dir, buffer);
    let raw = RawClientInfo::decode(guard.bytes())?;
    Ok(translate_client_info(raw))
}

fn translate_client_info(raw: RawClientInfo) -> ClientInfo {
    let address_family = AddressFamily::from_raw(raw.address_family);
    let client_address = codec::address_from_words(&raw.address, address_family);
    ClientInfo {
        client_name: raw.client_name,
        domain_name: raw.domain_name,
        user_name: raw.user_name,
        work_directory: raw.work_directory,
        initial_program: raw.initial_program,
        encryption_level: raw.encryption_level,
        address_family,
        client_address,
        h_res: raw.h_res,
        v_res: raw.v_res,
        color_depth: raw.color_depth,
        client_directory: raw.client_directory,
        build_number: raw.build_number,
        hardware_id: raw.hardware_id,
        product_id: raw.product_id,
        out_buf_count_host: raw.out_buf_count_host,
        out_buf_count_client: raw.out_buf_count_client,
        out_buf_length: raw.out_buf_length,
        device_id: raw.device_id,
    }
}

/// Fetch and decode the protocol statistics of one session.
pub fn query_session_stats<D: SessionDirectory>(
    handle: &HostHandle<D>,
    session_id: u32,
) -> WtsResult<SessionStats> {
    let dir = handle.directory();
    let buffer = dir.query_session(handle.raw(), session_id, InfoClass::SessionInfo)?;
    let guard = BufferGuard::single(dir, buffer);
    let raw = RawSessionStats::decode(guard.bytes())?;
    translate_session_stats(raw)
}

fn translate_session_stats(raw: RawSessionStats) -> WtsResult<SessionStats> {
    let state = SessionState::from_raw(raw.state).ok_or_else(|| WtsError::Decode {
        buffer: "protocol stats",
        detail: format!("unknown connect state {}", raw.state),
    })?;
    // The raw disconnect field holds stale data while a client is
    // attached; only a Disconnected session has a meaningful value.
    let disconnect_time = if state == SessionState::Disconnected {
        codec::filetime_to_local(raw.disconnect_time_utc)
    } else {
        None
    };
    Ok(SessionStats {
        state,
        session_id: raw.session_id,
        incoming_bytes: raw.incoming_bytes,
        outgoing_bytes: raw.outgoing_bytes,
        incoming_frames: raw.incoming_frames,
        outgoing_frames: raw.outgoing_frames,
        incoming_compressed_bytes: raw.incoming_compressed_bytes,
        outgoing_compressed_bytes: raw.outgoing_compressed_bytes,
        station_name: raw.station_name,
        domain_name: raw.domain_name,
        user_name: raw.user_name,
        connect_time: codec::filetime_to_local(raw.connect_time_utc),
        disconnect_time,
        last_input_time: codec::filetime_to_local(raw.last_input_time_utc),
        logon_time: codec::filetime_to_local(raw.logon_time_utc),
        current_time: codec::filetime_to_local(raw.current_time_utc),
    })
}

/// Fetch one string attribute. Callers use this for optional enrichment,
/// so a failed query is a miss, not an error.
pub fn query_string<D: SessionDirectory>(
    handle: &HostHandle<D>,
    session_id: u32,
    class: InfoClass,
) -> Option<String> {
    let dir = handle.directory();
    let buffer = dir.query_session(handle.raw(), session_id, class).ok()?;
    let guard = BufferGuard::single(dir, buffer);
    Some(codec::decode_wide_string(guard.bytes()))
}

// ─── Tests ───────────────────────────────────────────────────────────
