//! Session enumeration.
//!
//! Translates the level-1 enumeration records of one host into
//! [`SessionInfo`] values, filtering out records that have no logged-on
//! user (listeners and unassigned winstations are not actionable). The
//! detailed pass additionally queries per-session protocol statistics for
//! idle and logon times; those lookups are best-effort and never fail the
//! enclosing record.

use crate::codec::{self, RawSessionRecord, SESSION_INFO_LEVEL};
use crate::directory::{BufferGuard, HostHandle, InfoClass, SessionDirectory};
use crate::query;
use crate::types::{
    SessionInfo, SessionInfoExtra, SessionState, WtsError, WtsResult,
};
use chrono::{DateTime, FixedOffset};
use log::warn;
use std::time::Duration;

/// WinStation name of the physical console; it never has a remote client.
pub const CONSOLE_SESSION_NAME: &str = "console";

/// List the interactive sessions on the handle's host.
pub fn enumerate<D: SessionDirectory>(handle: &HostHandle<D>) -> WtsResult<Vec<SessionInfo>> {
    let records = enumerate_records(handle)?;
    let mut sessions = Vec::with_capacity(records.len());
    for record in records {
        if let Some(info) = translate_record(handle, record)? {
            sessions.push(info);
        }
    }
    Ok(sessions)
}

/// List interactive sessions with idle and logon times where available.
pub fn enumerate_detailed<D: SessionDirectory>(
    handle: &HostHandle<D>,
) -> WtsResult<Vec<SessionInfoExtra>> {
    let records = enumerate_records(handle)?;
    let mut sessions = Vec::with_capacity(records.len());
    for record in records {
        let session_id = record.session_id;
        let Some(info) = translate_record(handle, record)? else {
            continue;
        };
        let (idle_time, logon_time) = match query::query_session_stats(handle, session_id) {
            Ok(stats) => (
                idle_between(stats.last_input_time, stats.current_time),
                stats.logon_time,
            ),
            Err(err) => {
                warn!(
                    "detail query for session {session_id} on {} failed: {err}",
                    handle.host_name()
                );
                (None, None)
            }
        };
        sessions.push(SessionInfoExtra {
            info,
            idle_time,
            logon_time,
        });
    }
    Ok(sessions)
}

/// Drop sessions whose client is detached (Disconnected state).
pub fn filter_online(sessions: Vec<SessionInfo>) -> Vec<SessionInfo> {
    sessions
        .into_iter()
        .filter(|s| s.state != SessionState::Disconnected)
        .collect()
}

fn enumerate_records<D: SessionDirectory>(
    handle: &HostHandle<D>,
) -> WtsResult<Vec<RawSessionRecord>> {
    let dir = handle.directory();
    let enumeration = dir.enumerate_sessions(handle.raw())?;
    let level = enumeration.level;
    let count = enumeration.count;
    let guard = BufferGuard::enumeration(dir, enumeration.buffer, count);
    if level != SESSION_INFO_LEVEL {
        // The guard releases the buffer on this early return.
        return Err(WtsError::LevelMismatch {
            expected: SESSION_INFO_LEVEL,
            got: level,
        });
    }
    codec::decode_session_records(guard.bytes(), count)
}

fn translate_record<D: SessionDirectory>(
    handle: &HostHandle<D>,
    record: RawSessionRecord,
) -> WtsResult<Option<SessionInfo>> {
    if record.user_name.is_empty() {
        // Listener or unassigned winstation; not an interactive session.
        return Ok(None);
    }
    let state = SessionState::from_raw(record.state).ok_or_else(|| WtsError::Decode {
        buffer: "session enumeration",
        detail: format!("unknown connect state {}", record.state),
    })?;
    let client_name = if should_query_client_name(state, &record.session_name) {
        query::query_string(handle, record.session_id, InfoClass::ClientName)
    } else {
        None
    };
    Ok(Some(SessionInfo {
        session_id: record.session_id,
        state,
        session_name: record.session_name,
        user_name: record.user_name,
        domain_name: record.domain_name,
        host_name: handle.host_name().to_string(),
        client_name,
    }))
}

/// Disconnected sessions and the physical console cannot have a remote
/// client, so asking for one is a wasted round-trip.
fn should_query_client_name(state: SessionState, session_name: &str) -> bool {
    state != SessionState::Disconnected && session_name != CONSOLE_SESSION_NAME
}

fn idle_between(
    last_input: Option<DateTime<FixedOffset>>,
    current: Option<DateTime<FixedOffset>>,
) -> Option<Duration> {
    match (last_input, current) {
        (Some(last), Some(now)) => Some((now - last).to_std().unwrap_or_default()),
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RawSessionRecord, RawSessionStats};
    use crate::mock::{MockDirectory, MockHost, MockSession};
    use std::sync::Arc;

    const FILETIME_2024: i64 = 133_500_000_000_000_000;

    fn listener_session(session_id: u32) -> MockSession {
        MockSession {
            record: RawSessionRecord {
                session_id,
                state: SessionState::Listen.to_raw(),
                session_name: "rdp-tcp".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn open(dir: &Arc<MockDirectory>, host: &str) -> HostHandle<MockDirectory> {
        HostHandle::open(Arc::clone(dir), host).unwrap()
    }

    #[test]
    fn empty_user_records_are_filtered_and_client_name_fetched() {
        let dir = Arc::new(MockDirectory::new());
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![
                    listener_session(0),
                    MockSession::user_session(1, "alice", "rdp-1"),
                ],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate(&handle).unwrap();
        assert_eq!(sessions.len(), 1);
        let alice = &sessions[0];
        assert_eq!(alice.user_name, "alice");
        assert_eq!(alice.session_id, 1);
        assert_eq!(alice.state, SessionState::Active);
        assert_eq!(alice.host_name, "rdsh-01");
        // Active, non-console: the client name lookup was attempted.
        assert_eq!(alice.client_name.as_deref(), Some("ALICE-PC"));
        assert_eq!(
            dir.queries()
                .iter()
                .filter(|(_, sid, class)| *sid == 1 && *class == InfoClass::ClientName.raw())
                .count(),
            1
        );
        assert_eq!(dir.live_allocations(), 0);
    }

    #[test]
    fn console_session_skips_client_name_lookup() {
        let dir = Arc::new(MockDirectory::new());
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![MockSession::user_session(1, "alice", CONSOLE_SESSION_NAME)],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate(&handle).unwrap();
        assert_eq!(sessions[0].client_name, None);
        assert!(
            dir.queries().is_empty(),
            "no attribute query for a console session"
        );
    }

    #[test]
    fn disconnected_session_skips_client_name_lookup() {
        let dir = Arc::new(MockDirectory::new());
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![MockSession::user_session(2, "bob", "rdp-tcp#1")
                    .with_state(SessionState::Disconnected)],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate(&handle).unwrap();
        assert_eq!(sessions[0].client_name, None);
        assert!(dir.queries().is_empty());
    }

    #[test]
    fn missing_client_name_attribute_is_soft() {
        let dir = Arc::new(MockDirectory::new());
        let mut session = MockSession::user_session(1, "alice", "rdp-1");
        session.strings.clear();
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![session],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate(&handle).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].client_name, None);
    }

    #[test]
    fn level_mismatch_is_fatal_and_buffer_is_released() {
        let dir = Arc::new(MockDirectory::new());
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![MockSession::user_session(1, "alice", "rdp-1")],
                enumeration_level: Some(2),
                ..Default::default()
            },
        );
        {
            let handle = open(&dir, "rdsh-01");
            let err = enumerate(&handle).unwrap_err();
            assert_eq!(
                err,
                WtsError::LevelMismatch {
                    expected: 1,
                    got: 2
                }
            );
            assert_eq!(dir.live_allocations(), 0, "buffer released before the error");
        }
        assert_eq!(dir.close_count("rdsh-01"), 1);
    }

    #[test]
    fn enumeration_protocol_error_still_closes_handle() {
        let dir = Arc::new(MockDirectory::new());
        dir.add_host(
            "rdsh-01",
            MockHost {
                fail_enumerate: true,
                ..Default::default()
            },
        );
        {
            let handle = open(&dir, "rdsh-01");
            assert!(matches!(
                enumerate(&handle).unwrap_err(),
                WtsError::Protocol { .. }
            ));
        }
        assert_eq!(dir.close_count("rdsh-01"), 1);
        assert_eq!(dir.live_allocations(), 0);
    }

    fn stats_with_times(session_id: u32, last_input_off: i64, current_off: i64) -> RawSessionStats {
        RawSessionStats {
            state: SessionState::Active.to_raw(),
            session_id,
            last_input_time_utc: FILETIME_2024 + last_input_off * 10_000_000,
            logon_time_utc: FILETIME_2024,
            current_time_utc: FILETIME_2024 + current_off * 10_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn detailed_enumeration_computes_idle_and_logon() {
        let dir = Arc::new(MockDirectory::new());
        let mut session = MockSession::user_session(1, "alice", "rdp-1");
        session.stats = Some(stats_with_times(1, 100, 400));
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![session],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate_detailed(&handle).unwrap();
        assert_eq!(sessions.len(), 1);
        let extra = &sessions[0];
        assert_eq!(extra.info.user_name, "alice");
        // idle = current − last-input, and never negative.
        assert_eq!(extra.idle_time, Some(Duration::from_secs(300)));
        assert!(extra.logon_time.is_some());
    }

    #[test]
    fn detail_failure_is_swallowed_and_record_still_emitted() {
        let dir = Arc::new(MockDirectory::new());
        // No stats scripted: the detail query fails underneath.
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![MockSession::user_session(1, "alice", "rdp-1")],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate_detailed(&handle).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].idle_time, None);
        assert_eq!(sessions[0].logon_time, None);
        assert_eq!(dir.live_allocations(), 0);
    }

    #[test]
    fn detailed_enumeration_missing_timestamps_leave_idle_absent() {
        let dir = Arc::new(MockDirectory::new());
        let mut session = MockSession::user_session(1, "alice", "rdp-1");
        // Stats exist but carry no last-input/current times.
        session.stats = Some(RawSessionStats {
            state: SessionState::Active.to_raw(),
            session_id: 1,
            logon_time_utc: FILETIME_2024,
            ..Default::default()
        });
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![session],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = enumerate_detailed(&handle).unwrap();
        assert_eq!(sessions[0].idle_time, None);
        assert!(sessions[0].logon_time.is_some());
    }

    #[test]
    fn filter_online_drops_disconnected() {
        let dir = Arc::new(MockDirectory::new());
        dir.add_host(
            "rdsh-01",
            MockHost {
                sessions: vec![
                    MockSession::user_session(1, "alice", "rdp-1"),
                    MockSession::user_session(2, "bob", "rdp-2")
                        .with_state(SessionState::Disconnected),
                ],
                ..Default::default()
            },
        );
        let handle = open(&dir, "rdsh-01");

        let sessions = filter_online(enumerate(&handle).unwrap());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_name, "alice");
    }
}
