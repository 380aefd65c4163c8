//! In-memory session directory backend for the unit tests.
//!
//! Behaves like the native allocator: attribute buffers are heap
//! allocations handed out as raw pointers and reclaimed through the free
//! entry points, with a ledger that panics on double frees and counts
//! live allocations. Hosts, sessions, reported enumeration levels, and
//! per-call failures are all scripted.

use crate::codec::{self, RawClientInfo, RawSessionRecord, RawSessionStats, SESSION_INFO_LEVEL};
use crate::directory::{DirBuffer, DirHandle, InfoClass, SessionDirectory, SessionEnumeration};
use crate::types::{SessionState, WtsError, WtsResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// One scripted session on a mock host.
pub struct MockSession {
    pub record: RawSessionRecord,
    pub client_info: Option<RawClientInfo>,
    pub stats: Option<RawSessionStats>,
    /// String attributes keyed by raw info-class id.
    pub strings: HashMap<u32, String>,
    /// Raw response code returned when a message waits for one.
    pub message_response: u32,
    pub fail_query: bool,
    pub fail_disconnect: bool,
    pub fail_logoff: bool,
    pub fail_message: bool,
}

impl Default for MockSession {
    fn default() -> Self {
        Self {
            record: RawSessionRecord::default(),
            client_info: None,
            stats: None,
            strings: HashMap::new(),
            message_response: 1, // IDOK
            fail_query: false,
            fail_disconnect: false,
            fail_logoff: false,
            fail_message: false,
        }
    }
}

impl MockSession {
    /// An Active session with a user, a client-name attribute, and the
    /// CORP domain.
    pub fn user_session(session_id: u32, user: &str, session_name: &str) -> Self {
        let mut session = Self {
            record: RawSessionRecord {
                exec_env_id: session_id,
                state: SessionState::Active.to_raw(),
                session_id,
                session_name: session_name.into(),
                host_name: String::new(),
                user_name: user.into(),
                domain_name: "CORP".into(),
                farm_name: String::new(),
            },
            ..Default::default()
        };
        session.strings.insert(
            InfoClass::ClientName.raw(),
            format!("{}-PC", user.to_uppercase()),
        );
        session
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.record.state = state.to_raw();
        self
    }
}

/// One scripted host.
#[derive(Default)]
pub struct MockHost {
    pub sessions: Vec<MockSession>,
    /// Fail `open` with this OS code instead of connecting.
    pub fail_open_code: Option<u32>,
    /// Fail enumeration with a protocol error.
    pub fail_enumerate: bool,
    /// Report this protocol level instead of the requested one.
    pub enumeration_level: Option<u32>,
}

/// A message delivery observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub host_name: String,
    pub session_id: u32,
    pub title: String,
    pub body: String,
    pub style: u32,
    pub timeout_secs: u32,
    pub wait: bool,
}

#[derive(Default)]
struct State {
    hosts: HashMap<String, MockHost>,
    next_handle: isize,
    open_handles: HashMap<isize, String>,
    opens: Vec<String>,
    closes: Vec<String>,
    /// ptr -> physical allocation length.
    allocations: HashMap<usize, u32>,
    freed_buffers: usize,
    /// Every attribute query attempted: (host, session id, raw class).
    queries: Vec<(String, u32, u32)>,
    disconnects: Vec<(String, u32, bool)>,
    logoffs: Vec<(String, u32, bool)>,
    messages: Vec<SentMessage>,
}

/// Scripted in-memory implementation of [`SessionDirectory`].
#[derive(Default)]
pub struct MockDirectory {
    state: Mutex<State>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, name: &str, host: MockHost) {
        self.state
            .lock()
            .unwrap()
            .hosts
            .insert(name.to_string(), host);
    }

    pub fn open_count(&self, host: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .opens
            .iter()
            .filter(|h| *h == host)
            .count()
    }

    pub fn close_count(&self, host: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .closes
            .iter()
            .filter(|h| *h == host)
            .count()
    }

    pub fn open_handle_count(&self) -> usize {
        self.state.lock().unwrap().open_handles.len()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().unwrap().allocations.len()
    }

    pub fn freed_buffers(&self) -> usize {
        self.state.lock().unwrap().freed_buffers
    }

    pub fn queries(&self) -> Vec<(String, u32, u32)> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn disconnects(&self) -> Vec<(String, u32, bool)> {
        self.state.lock().unwrap().disconnects.clone()
    }

    pub fn logoffs(&self) -> Vec<(String, u32, bool)> {
        self.state.lock().unwrap().logoffs.clone()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    fn alloc(state: &mut State, bytes: Vec<u8>) -> DirBuffer {
        let logical_len = bytes.len() as u32;
        let mut bytes = bytes;
        if bytes.is_empty() {
            // Keep empty buffers addressable so every allocation has a
            // unique ledger key.
            bytes.push(0);
        }
        let boxed = bytes.into_boxed_slice();
        let physical_len = boxed.len() as u32;
        let ptr = Box::into_raw(boxed) as *mut u8 as usize;
        state.allocations.insert(ptr, physical_len);
        DirBuffer {
            ptr,
            len: logical_len,
        }
    }

    fn release(state: &mut State, buffer: DirBuffer) {
        let physical_len = state
            .allocations
            .remove(&buffer.ptr)
            .expect("double free or foreign buffer");
        // SAFETY: the pointer came from Box::into_raw in `alloc` and the
        // ledger guarantees it has not been freed yet.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                buffer.ptr as *mut u8,
                physical_len as usize,
            )));
        }
        state.freed_buffers += 1;
    }

    fn host_of(state: &State, handle: DirHandle) -> String {
        state
            .open_handles
            .get(&handle.0)
            .expect("call on unknown or closed handle")
            .clone()
    }
}

fn protocol_err(call: String, code: u32) -> WtsError {
    WtsError::Protocol { call, code }
}

impl SessionDirectory for MockDirectory {
    fn open(&self, host_name: &str) -> WtsResult<DirHandle> {
        let mut state = self.state.lock().unwrap();
        {
            let host = state.hosts.get(host_name).ok_or(WtsError::Connectivity {
                host: host_name.to_string(),
                code: 1722, // RPC server unavailable
            })?;
            if let Some(code) = host.fail_open_code {
                return Err(WtsError::Connectivity {
                    host: host_name.to_string(),
                    code,
                });
            }
        }
        state.next_handle += 1;
        let raw = state.next_handle;
        state.open_handles.insert(raw, host_name.to_string());
        state.opens.push(host_name.to_string());
        Ok(DirHandle(raw))
    }

    fn close(&self, handle: DirHandle) {
        let mut state = self.state.lock().unwrap();
        let host = state
            .open_handles
            .remove(&handle.0)
            .expect("close of unknown or already-closed handle");
        state.closes.push(host);
    }

    fn enumerate_sessions(&self, handle: DirHandle) -> WtsResult<SessionEnumeration> {
        let mut state = self.state.lock().unwrap();
        let host_name = Self::host_of(&state, handle);
        let (level, count, bytes) = {
            let host = state.hosts.get(&host_name).expect("host disappeared");
            if host.fail_enumerate {
                return Err(protocol_err("EnumerateSessions".into(), 5));
            }
            let records: Vec<RawSessionRecord> =
                host.sessions.iter().map(|s| s.record.clone()).collect();
            (
                host.enumeration_level.unwrap_or(SESSION_INFO_LEVEL),
                records.len() as u32,
                codec::encode_session_records(&records),
            )
        };
        let buffer = Self::alloc(&mut state, bytes);
        Ok(SessionEnumeration {
            level,
            count,
            buffer,
        })
    }

    fn query_session(
        &self,
        handle: DirHandle,
        session_id: u32,
        class: InfoClass,
    ) -> WtsResult<DirBuffer> {
        let mut state = self.state.lock().unwrap();
        let host_name = Self::host_of(&state, handle);
        state
            .queries
            .push((host_name.clone(), session_id, class.raw()));
        let bytes = {
            let host = state.hosts.get(&host_name).expect("host disappeared");
            let session = host
                .sessions
                .iter()
                .find(|s| s.record.session_id == session_id)
                .ok_or_else(|| {
                    protocol_err(format!("QuerySessionAttribute(session {session_id})"), 2)
                })?;
            if session.fail_query {
                return Err(protocol_err(
                    format!("QuerySessionAttribute(session {session_id})"),
                    5,
                ));
            }
            match class {
                InfoClass::ClientInfo => session
                    .client_info
                    .as_ref()
                    .map(RawClientInfo::encode)
                    .ok_or_else(|| {
                        protocol_err(format!("QuerySessionAttribute(session {session_id})"), 87)
                    })?,
                InfoClass::SessionInfo => session
                    .stats
                    .as_ref()
                    .map(RawSessionStats::encode)
                    .ok_or_else(|| {
                        protocol_err(format!("QuerySessionAttribute(session {session_id})"), 87)
                    })?,
                other => session
                    .strings
                    .get(&other.raw())
                    .map(|s| codec::encode_wide_string(s))
                    .ok_or_else(|| {
                        protocol_err(format!("QuerySessionAttribute(session {session_id})"), 87)
                    })?,
            }
        };
        Ok(Self::alloc(&mut state, bytes))
    }

    fn buffer_bytes<'a>(&'a self, buffer: &'a DirBuffer) -> &'a [u8] {
        {
            let state = self.state.lock().unwrap();
            assert!(
                state.allocations.contains_key(&buffer.ptr),
                "read of a freed buffer"
            );
        }
        // SAFETY: the ledger check above guarantees the allocation is
        // still live; the lifetime is tied to the descriptor borrow.
        unsafe { std::slice::from_raw_parts(buffer.ptr as *const u8, buffer.len as usize) }
    }

    fn free_buffer(&self, buffer: DirBuffer) {
        let mut state = self.state.lock().unwrap();
        Self::release(&mut state, buffer);
    }

    fn free_enumeration(&self, buffer: DirBuffer, _count: u32) {
        let mut state = self.state.lock().unwrap();
        Self::release(&mut state, buffer);
    }

    fn disconnect(&self, handle: DirHandle, session_id: u32, wait: bool) -> WtsResult<()> {
        let mut state = self.state.lock().unwrap();
        let host_name = Self::host_of(&state, handle);
        {
            let host = state.hosts.get(&host_name).expect("host disappeared");
            let session = host
                .sessions
                .iter()
                .find(|s| s.record.session_id == session_id)
                .ok_or_else(|| {
                    protocol_err(format!("DisconnectSession({session_id})"), 2)
                })?;
            if session.fail_disconnect {
                return Err(protocol_err(format!("DisconnectSession({session_id})"), 5));
            }
        }
        state.disconnects.push((host_name, session_id, wait));
        Ok(())
    }

    fn logoff(&self, handle: DirHandle, session_id: u32, wait: bool) -> WtsResult<()> {
        let mut state = self.state.lock().unwrap();
        let host_name = Self::host_of(&state, handle);
        {
            let host = state.hosts.get(&host_name).expect("host disappeared");
            let session = host
                .sessions
                .iter()
                .find(|s| s.record.session_id == session_id)
                .ok_or_else(|| protocol_err(format!("LogoffSession({session_id})"), 2))?;
            if session.fail_logoff {
                return Err(protocol_err(format!("LogoffSession({session_id})"), 5));
            }
        }
        state.logoffs.push((host_name, session_id, wait));
        Ok(())
    }

    fn send_message(
        &self,
        handle: DirHandle,
        session_id: u32,
        title: &str,
        body: &str,
        style: u32,
        timeout_secs: u32,
        wait: bool,
    ) -> WtsResult<u32> {
        let mut state = self.state.lock().unwrap();
        let host_name = Self::host_of(&state, handle);
        let response = {
            let host = state.hosts.get(&host_name).expect("host disappeared");
            let session = host
                .sessions
                .iter()
                .find(|s| s.record.session_id == session_id)
                .ok_or_else(|| protocol_err(format!("SendMessage({session_id})"), 2))?;
            if session.fail_message {
                return Err(protocol_err(format!("SendMessage({session_id})"), 5));
            }
            if wait {
                session.message_response
            } else {
                32001 // delivery queued, nobody waited
            }
        };
        state.messages.push(SentMessage {
            host_name,
            session_id,
            title: title.to_string(),
            body: body.to_string(),
            style,
            timeout_secs,
            wait,
        });
        Ok(response)
    }
}
