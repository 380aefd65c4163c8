//! The session directory surface and its resource guards.
//!
//! [`SessionDirectory`] is the native protocol boundary: open/close a host
//! connection, enumerate sessions, query per-session attribute buffers, and
//! apply session actions. The Windows backend lives in [`crate::wts_ffi`];
//! the tests drive the same surface through an in-memory backend.
//!
//! Handles and buffers are owned by scoped guards so release happens on
//! every exit path, never by caller discipline: [`HostHandle`] closes its
//! connection exactly once on drop, [`BufferGuard`] frees its allocation
//! exactly once on drop.

use crate::types::WtsResult;
use log::debug;
use std::sync::Arc;

/// Opaque token for one open connection to a host's session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(pub(crate) isize);

/// Descriptor of one directory-allocated buffer. Must be passed back to
/// the owning directory's free function exactly once; [`BufferGuard`]
/// enforces that.
#[derive(Debug)]
pub struct DirBuffer {
    pub(crate) ptr: usize,
    pub(crate) len: u32,
}

impl DirBuffer {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// What an enumeration call produced: the protocol level the service
/// actually answered with, the record count, and the record buffer (which
/// must be freed even when the level is not the requested one).
#[derive(Debug)]
pub struct SessionEnumeration {
    pub level: u32,
    pub count: u32,
    pub buffer: DirBuffer,
}

/// Attribute classes accepted by [`SessionDirectory::query_session`],
/// with their native numeric ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InfoClass {
    InitialProgram = 0,
    ApplicationName = 1,
    WorkingDirectory = 2,
    OemId = 3,
    SessionId = 4,
    UserName = 5,
    WinStationName = 6,
    DomainName = 7,
    ConnectState = 8,
    ClientBuildNumber = 9,
    ClientName = 10,
    ClientDirectory = 11,
    ClientProductId = 12,
    ClientHardwareId = 13,
    ClientAddress = 14,
    ClientDisplay = 15,
    ClientProtocolType = 16,
    IdleTime = 17,
    LogonTime = 18,
    IncomingBytes = 19,
    OutgoingBytes = 20,
    IncomingFrames = 21,
    OutgoingFrames = 22,
    ClientInfo = 23,
    SessionInfo = 24,
    SessionInfoEx = 25,
    ConfigInfo = 26,
    ValidationInfo = 27,
    SessionAddressV4 = 28,
    IsRemoteSession = 29,
}

impl InfoClass {
    pub fn raw(self) -> u32 {
        self as u32
    }
}

/// The native session directory of one or more hosts.
///
/// All entry points are safe to invoke concurrently on the same handle
/// from multiple tasks; the directory service multiplexes queries on one
/// connection. Blocking is expected: every call may take a full network
/// round-trip to the target host.
pub trait SessionDirectory: Send + Sync {
    /// Open a connection to `host_name`'s session directory.
    fn open(&self, host_name: &str) -> WtsResult<DirHandle>;

    /// Close an open connection. Called exactly once per successful open.
    fn close(&self, handle: DirHandle);

    /// Enumerate sessions at protocol level 1. The returned buffer must be
    /// freed via [`free_enumeration`](Self::free_enumeration) regardless of
    /// the reported level.
    fn enumerate_sessions(&self, handle: DirHandle) -> WtsResult<SessionEnumeration>;

    /// Fetch one attribute buffer for a session. The buffer must be freed
    /// via [`free_buffer`](Self::free_buffer).
    fn query_session(
        &self,
        handle: DirHandle,
        session_id: u32,
        class: InfoClass,
    ) -> WtsResult<DirBuffer>;

    /// Borrow the bytes of a live buffer.
    fn buffer_bytes<'a>(&'a self, buffer: &'a DirBuffer) -> &'a [u8];

    /// Release a single-query buffer.
    fn free_buffer(&self, buffer: DirBuffer);

    /// Release an enumeration buffer of `count` records.
    fn free_enumeration(&self, buffer: DirBuffer, count: u32);

    /// Detach the client from a session without destroying it.
    fn disconnect(&self, handle: DirHandle, session_id: u32, wait: bool) -> WtsResult<()>;

    /// Terminate a session.
    fn logoff(&self, handle: DirHandle, session_id: u32, wait: bool) -> WtsResult<()>;

    /// Show a message box in a session; returns the raw response code.
    #[allow(clippy::too_many_arguments)]
    fn send_message(
        &self,
        handle: DirHandle,
        session_id: u32,
        title: &str,
        body: &str,
        style: u32,
        timeout_secs: u32,
        wait: bool,
    ) -> WtsResult<u32>;
}

// ─── Host handle ─────────────────────────────────────────────────────

/// Scoped owner of one open host connection. The connection is closed
/// exactly once when the handle drops, on every exit path.
pub struct HostHandle<D: SessionDirectory> {
    dir: Arc<D>,
    raw: DirHandle,
    host_name: String,
}

impl<D: SessionDirectory> HostHandle<D> {
    /// Open `host_name`'s session directory. Fails with
    /// [`crate::types::WtsError::Connectivity`] when the host cannot be
    /// reached.
    pub fn open(dir: Arc<D>, host_name: &str) -> WtsResult<Self> {
        let raw = dir.open(host_name)?;
        debug!("opened session directory handle for {host_name}");
        Ok(Self {
            dir,
            raw,
            host_name: host_name.to_string(),
        })
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn raw(&self) -> DirHandle {
        self.raw
    }

    pub fn directory(&self) -> &D {
        &self.dir
    }
}

impl<D: SessionDirectory> std::fmt::Debug for HostHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("raw", &self.raw)
            .field("host_name", &self.host_name)
            .finish()
    }
}

impl<D: SessionDirectory> Drop for HostHandle<D> {
    fn drop(&mut self) {
        self.dir.close(self.raw);
        debug!("closed session directory handle for {}", self.host_name);
    }
}

// ─── Buffer guard ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum GuardKind {
    Single,
    Enumeration { count: u32 },
}

/// Scoped owner of one directory-allocated buffer; frees it exactly once
/// when dropped.
pub struct BufferGuard<'d, D: SessionDirectory> {
    dir: &'d D,
    buffer: Option<DirBuffer>,
    kind: GuardKind,
}

impl<'d, D: SessionDirectory> BufferGuard<'d, D> {
    /// Guard a single-query buffer.
    pub fn single(dir: &'d D, buffer: DirBuffer) -> Self {
        Self {
            dir,
            buffer: Some(buffer),
            kind: GuardKind::Single,
        }
    }

    /// Guard an enumeration buffer of `count` records.
    pub fn enumeration(dir: &'d D, buffer: DirBuffer, count: u32) -> Self {
        Self {
            dir,
            buffer: Some(buffer),
            kind: GuardKind::Enumeration { count },
        }
    }

    /// The guarded bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => self.dir.buffer_bytes(buffer),
            None => &[],
        }
    }
}

impl<D: SessionDirectory> Drop for BufferGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            match self.kind {
                GuardKind::Single => self.dir.free_buffer(buffer),
                GuardKind::Enumeration { count } => self.dir.free_enumeration(buffer, count),
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
