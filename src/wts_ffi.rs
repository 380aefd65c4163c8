//! Native backend over the Windows Terminal Services API (`wtsapi32.dll`).
//!
//! Implements [`SessionDirectory`] for real hosts. Only compiled on
//! Windows.
//!
//! # Safety
//!
//! Every `unsafe` block is documented with the invariant it relies on.
//! Level-1 enumeration records embed string pointers, so they are
//! flattened into a crate-owned allocation at this boundary and the native
//! array is freed immediately; that allocation is what
//! [`free_enumeration`](SessionDirectory::free_enumeration) reclaims.
//! Single-query buffers are handed out unmodified and reclaimed with
//! `WTSFreeMemory`.

use crate::codec::{self, RawSessionRecord, SESSION_INFO_LEVEL};
use crate::directory::{DirBuffer, DirHandle, InfoClass, SessionDirectory, SessionEnumeration};
use crate::types::{WtsError, WtsResult};
use log::{debug, warn};
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{GetLastError, HANDLE};
use windows::Win32::System::RemoteDesktop::{
    WTSCloseServer, WTSDisconnectSession, WTSEnumerateSessionsExW, WTSFreeMemory,
    WTSFreeMemoryExW, WTSLogoffSession, WTSOpenServerExW, WTSQuerySessionInformationW,
    WTSSendMessageW, WTSTypeSessionInfoLevel1, WTS_INFO_CLASS, WTS_SESSION_INFO_1W,
};
use windows::Win32::UI::WindowsAndMessaging::{MESSAGEBOX_RESULT, MESSAGEBOX_STYLE};

/// [`SessionDirectory`] backed by the local `wtsapi32` entry points.
#[derive(Debug, Default)]
pub struct NativeDirectory;

impl NativeDirectory {
    pub fn new() -> Self {
        Self
    }
}

/// Encode a Rust string as a null-terminated wide string.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0u16)).collect()
}

/// Decode a null-terminated wide string pointer to a Rust String.
///
/// # Safety
/// `ptr` must be null or a valid, null-terminated UTF-16 string pointer.
unsafe fn from_wide_ptr(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    let slice = std::slice::from_raw_parts(ptr, len);
    OsString::from_wide(slice).to_string_lossy().into_owned()
}

fn native_handle(handle: DirHandle) -> HANDLE {
    HANDLE(handle.0 as *mut core::ffi::c_void)
}

fn protocol_err(call: String, error: &windows::core::Error) -> WtsError {
    WtsError::Protocol {
        call,
        code: error.code().0 as u32,
    }
}

/// Move a byte vector into a crate-owned allocation described by a
/// [`DirBuffer`]. Empty payloads are padded to one byte so the
/// allocation stays addressable.
fn own_alloc(bytes: Vec<u8>) -> DirBuffer {
    let logical_len = bytes.len() as u32;
    let mut bytes = bytes;
    if bytes.is_empty() {
        bytes.push(0);
    }
    let ptr = Box::into_raw(bytes.into_boxed_slice()) as *mut u8 as usize;
    DirBuffer {
        ptr,
        len: logical_len,
    }
}

/// Reclaim an allocation produced by [`own_alloc`].
///
/// # Safety
/// Must be called exactly once per `own_alloc` result; the guard layer
/// enforces that.
unsafe fn own_free(buffer: DirBuffer) {
    let physical_len = (buffer.len as usize).max(1);
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
        buffer.ptr as *mut u8,
        physical_len,
    )));
}

impl SessionDirectory for NativeDirectory {
    fn open(&self, host_name: &str) -> WtsResult<DirHandle> {
        let wide = to_wide(host_name);
        // SAFETY: WTSOpenServerExW expects a PCWSTR; the vec is
        // null-terminated and outlives the call.
        let handle = unsafe { WTSOpenServerExW(PCWSTR(wide.as_ptr())) };
        if handle.is_invalid() || handle.0.is_null() {
            // SAFETY: reading the thread-local error code set by the call.
            let code = unsafe { GetLastError().0 };
            return Err(WtsError::Connectivity {
                host: host_name.to_string(),
                code,
            });
        }
        debug!("opened WTS server handle for {host_name}");
        Ok(DirHandle(handle.0 as isize))
    }

    fn close(&self, handle: DirHandle) {
        // SAFETY: only called with a handle returned by open, exactly once.
        unsafe { WTSCloseServer(native_handle(handle)) };
    }

    fn enumerate_sessions(&self, handle: DirHandle) -> WtsResult<SessionEnumeration> {
        let mut level: u32 = SESSION_INFO_LEVEL;
        let mut info_ptr: *mut WTS_SESSION_INFO_1W = std::ptr::null_mut();
        let mut count: u32 = 0;

        // SAFETY: WTSEnumerateSessionsExW fills level/info_ptr/count; the
        // returned array is freed below with WTSFreeMemoryExW.
        unsafe {
            WTSEnumerateSessionsExW(native_handle(handle), &mut level, 0, &mut info_ptr, &mut count)
        }
        .map_err(|e| protocol_err("WTSEnumerateSessionsExW".into(), &e))?;

        let bytes = if level == SESSION_INFO_LEVEL && !info_ptr.is_null() {
            let mut records = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                // SAFETY: info_ptr points to `count` contiguous level-1
                // records; the embedded string pointers are valid until the
                // array is freed.
                let raw = unsafe { &*info_ptr.add(i) };
                records.push(RawSessionRecord {
                    exec_env_id: raw.ExecEnvId,
                    state: raw.State.0,
                    session_id: raw.SessionId,
                    session_name: unsafe { from_wide_ptr(raw.pSessionName.0) },
                    host_name: unsafe { from_wide_ptr(raw.pHostName.0) },
                    user_name: unsafe { from_wide_ptr(raw.pUserName.0) },
                    domain_name: unsafe { from_wide_ptr(raw.pDomainName.0) },
                    farm_name: unsafe { from_wide_ptr(raw.pFarmName.0) },
                });
            }
            codec::encode_session_records(&records)
        } else {
            // A foreign level cannot be decoded as level-1 records; the
            // caller sees the reported level and bails out.
            Vec::new()
        };

        if !info_ptr.is_null() {
            // SAFETY: freeing the array allocated by the enumeration call.
            if let Err(e) =
                unsafe { WTSFreeMemoryExW(WTSTypeSessionInfoLevel1, info_ptr as *mut _, count) }
            {
                warn!("WTSFreeMemoryExW failed: {e}");
            }
        }

        Ok(SessionEnumeration {
            level,
            count: if level == SESSION_INFO_LEVEL { count } else { 0 },
            buffer: own_alloc(bytes),
        })
    }

    fn query_session(
        &self,
        handle: DirHandle,
        session_id: u32,
        class: InfoClass,
    ) -> WtsResult<DirBuffer> {
        let mut buf = PWSTR::null();
        let mut bytes: u32 = 0;

        // SAFETY: WTSQuerySessionInformationW fills buf/bytes; the buffer
        // is released through free_buffer by the guard layer.
        unsafe {
            WTSQuerySessionInformationW(
                native_handle(handle),
                session_id,
                WTS_INFO_CLASS(class.raw() as i32),
                &mut buf,
                &mut bytes,
            )
        }
        .map_err(|e| {
            protocol_err(
                format!(
                    "WTSQuerySessionInformationW(session {session_id}, class {})",
                    class.raw()
                ),
                &e,
            )
        })?;

        if buf.is_null() {
            return Err(WtsError::Protocol {
                call: format!(
                    "WTSQuerySessionInformationW(session {session_id}, class {})",
                    class.raw()
                ),
                code: 0,
            });
        }

        Ok(DirBuffer {
            ptr: buf.as_ptr() as usize,
            len: bytes,
        })
    }

    fn buffer_bytes<'a>(&'a self, buffer: &'a DirBuffer) -> &'a [u8] {
        // SAFETY: the descriptor came from query_session or
        // enumerate_sessions and has not been freed yet (the guard owns
        // the free).
        unsafe { std::slice::from_raw_parts(buffer.ptr as *const u8, buffer.len as usize) }
    }

    fn free_buffer(&self, buffer: DirBuffer) {
        // SAFETY: freeing a buffer allocated by the query call, once.
        unsafe { WTSFreeMemory(buffer.ptr as *mut _) };
    }

    fn free_enumeration(&self, buffer: DirBuffer, _count: u32) {
        // SAFETY: the enumeration buffer is a crate-owned flattening,
        // reclaimed exactly once by the guard.
        unsafe { own_free(buffer) };
    }

    fn disconnect(&self, handle: DirHandle, session_id: u32, wait: bool) -> WtsResult<()> {
        // SAFETY: plain FFI call on an open handle.
        unsafe { WTSDisconnectSession(native_handle(handle), session_id, wait) }
            .map_err(|e| protocol_err(format!("WTSDisconnectSession({session_id})"), &e))?;
        debug!("disconnected session {session_id}");
        Ok(())
    }

    fn logoff(&self, handle: DirHandle, session_id: u32, wait: bool) -> WtsResult<()> {
        // SAFETY: plain FFI call on an open handle.
        unsafe { WTSLogoffSession(native_handle(handle), session_id, wait) }
            .map_err(|e| protocol_err(format!("WTSLogoffSession({session_id})"), &e))?;
        debug!("logged off session {session_id}");
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
        let wide_title = to_wide(title);
        let wide_body = to_wide(body);
        let mut response = MESSAGEBOX_RESULT(0);

        // SAFETY: both strings are null-terminated and outlive the call;
        // lengths are passed in bytes.
        unsafe {
            WTSSendMessageW(
                native_handle(handle),
                session_id,
                PCWSTR(wide_title.as_ptr()),
                (wide_title.len() as u32) * 2,
                PCWSTR(wide_body.as_ptr()),
                (wide_body.len() as u32) * 2,
                MESSAGEBOX_STYLE(style),
                timeout_secs,
                &mut response,
                wait,
            )
        }
        .map_err(|e| protocol_err(format!("WTSSendMessageW(session {session_id})"), &e))?;

        Ok(response.0 as u32)
    }
}
