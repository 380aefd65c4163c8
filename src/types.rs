//! Domain types for session directory management.
//!
//! These are Rust-native, serde-friendly representations of what the native
//! WTS structures describe. Raw buffer layouts live in [`crate::codec`];
//! everything here is already translated.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

// ─── Errors ──────────────────────────────────────────────────────────

/// All errors produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WtsError {
    /// The session directory on a host could not be opened at all.
    /// Scoped to the whole host; carries the platform error code.
    #[error("cannot open session directory on '{host}' (OS error {code})")]
    Connectivity { host: String, code: u32 },

    /// A single enumeration/query/action call failed in the native layer.
    #[error("{call} failed (OS error {code})")]
    Protocol { call: String, code: u32 },

    /// Enumeration reported a protocol level other than the one requested.
    /// Fatal for that host; any buffer already obtained has been released.
    #[error("session enumeration returned level {got}, expected level {expected}")]
    LevelMismatch { expected: u32, got: u32 },

    /// A native buffer did not decode under the documented layout.
    #[error("malformed {buffer} buffer: {detail}")]
    Decode { buffer: &'static str, detail: String },
}

impl WtsError {
    /// The platform error code, when this error carries one.
    pub fn os_code(&self) -> Option<u32> {
        match self {
            Self::Connectivity { code, .. } | Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type WtsResult<T> = Result<T, WtsError>;

// ─── Connection state ────────────────────────────────────────────────

/// The ten connection states a session can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// User is logged on and actively connected.
    Active,
    /// Session is connected to the client.
    Connected,
    /// Session is in the process of connecting to the client.
    ConnectQuery,
    /// Session is shadowing another session.
    Shadow,
    /// Session is alive but the client is detached.
    Disconnected,
    /// WinStation is waiting for a client to connect.
    Idle,
    /// WinStation is listening for a connection.
    Listen,
    /// WinStation is being reset.
    Reset,
    /// WinStation is down due to an error.
    Down,
    /// WinStation is initializing.
    Init,
}

impl SessionState {
    /// Decode the native `WTS_CONNECTSTATE_CLASS` discriminant.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Active),
            1 => Some(Self::Connected),
            2 => Some(Self::ConnectQuery),
            3 => Some(Self::Shadow),
            4 => Some(Self::Disconnected),
            5 => Some(Self::Idle),
            6 => Some(Self::Listen),
            7 => Some(Self::Reset),
            8 => Some(Self::Down),
            9 => Some(Self::Init),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Active => 0,
            Self::Connected => 1,
            Self::ConnectQuery => 2,
            Self::Shadow => 3,
            Self::Disconnected => 4,
            Self::Idle => 5,
            Self::Listen => 6,
            Self::Reset => 7,
            Self::Down => 8,
            Self::Init => 9,
        }
    }

    /// States with no client attached and no user activity possible.
    pub fn is_inactive(self) -> bool {
        matches!(
            self,
            Self::Listen | Self::Down | Self::Init | Self::Disconnected
        )
    }

    /// States in which the session counts as online. Not the complement of
    /// [`is_inactive`](Self::is_inactive): ConnectQuery and Reset are online
    /// without being listed as inactive.
    pub fn is_online(self) -> bool {
        matches!(
            self,
            Self::Active
                | Self::Connected
                | Self::ConnectQuery
                | Self::Shadow
                | Self::Idle
                | Self::Reset
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Connected => write!(f, "Connected"),
            Self::ConnectQuery => write!(f, "ConnectQuery"),
            Self::Shadow => write!(f, "Shadow"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Idle => write!(f, "Idle"),
            Self::Listen => write!(f, "Listen"),
            Self::Reset => write!(f, "Reset"),
            Self::Down => write!(f, "Down"),
            Self::Init => write!(f, "Init"),
        }
    }
}

// ─── Session records ─────────────────────────────────────────────────

/// Identity of one session within the fleet: host name plus the numeric
/// session id, which is unique per host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub host_name: String,
    pub session_id: u32,
}

impl SessionIdentity {
    pub fn new(host_name: impl Into<String>, session_id: u32) -> Self {
        Self {
            host_name: host_name.into(),
            session_id,
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_name, self.session_id)
    }
}

/// One interactive session as produced by enumeration. Sessions without a
/// user name (listeners, unassigned winstations) are never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: u32,
    pub state: SessionState,
    pub session_name: String,
    pub user_name: String,
    pub domain_name: String,
    /// The host the enumeration was issued against.
    pub host_name: String,
    /// Name of the connected client device, when one could be queried.
    pub client_name: Option<String>,
}

impl SessionInfo {
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(self.host_name.clone(), self.session_id)
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (session {}, name {}, state {})",
            self.host_name, self.user_name, self.session_id, self.session_name, self.state
        )
    }
}

/// A session record enriched with timing detail. Both extras are
/// best-effort: a failed detail query leaves them absent without failing
/// the enclosing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoExtra {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub idle_time: Option<Duration>,
    pub logon_time: Option<DateTime<FixedOffset>>,
}

// ─── Client information ──────────────────────────────────────────────

/// Network address family reported for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressFamily {
    Unspecified,
    Ipv4,
    Ipv6,
    Other(u32),
}

impl AddressFamily {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Unspecified,
            2 => Self::Ipv4,
            23 => Self::Ipv6,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Unspecified => 0,
            Self::Ipv4 => 2,
            Self::Ipv6 => 23,
            Self::Other(raw) => raw,
        }
    }
}

/// Client-side attributes of a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_name: String,
    pub domain_name: String,
    pub user_name: String,
    pub work_directory: String,
    pub initial_program: String,
    pub encryption_level: u8,
    pub address_family: AddressFamily,
    pub client_address: Option<IpAddr>,
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

// ─── Protocol statistics ─────────────────────────────────────────────

/// Per-session protocol statistics and timing, translated from the native
/// session-info buffer. Timestamps are local time under the current UTC
/// offset; absent when the raw field is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub state: SessionState,
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
    pub connect_time: Option<DateTime<FixedOffset>>,
    /// Only populated while the session is Disconnected; the raw field is
    /// stale for attached sessions.
    pub disconnect_time: Option<DateTime<FixedOffset>>,
    pub last_input_time: Option<DateTime<FixedOffset>>,
    pub logon_time: Option<DateTime<FixedOffset>>,
    pub current_time: Option<DateTime<FixedOffset>>,
}

// ─── Messaging ───────────────────────────────────────────────────────

/// Button set for the message box shown on the session's desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageButtons {
    Ok,
    OkCancel,
    AbortRetryIgnore,
    YesNoCancel,
    YesNo,
    RetryCancel,
    CancelTryContinue,
}

impl MessageButtons {
    /// The MB_xxx style bits for this button set.
    pub fn style_bits(self) -> u32 {
        match self {
            Self::Ok => 0x0000_0000,
            Self::OkCancel => 0x0000_0001,
            Self::AbortRetryIgnore => 0x0000_0002,
            Self::YesNoCancel => 0x0000_0003,
            Self::YesNo => 0x0000_0004,
            Self::RetryCancel => 0x0000_0005,
            Self::CancelTryContinue => 0x0000_0006,
        }
    }
}

impl Default for MessageButtons {
    fn default() -> Self {
        Self::Ok
    }
}

/// Response produced by a message-box delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageResponse {
    Ok,
    Cancel,
    Abort,
    Retry,
    Ignore,
    Yes,
    No,
    TryAgain,
    Continue,
    /// The user did not respond before the configured timeout elapsed.
    Timeout,
    /// Fire-and-forget delivery; no response was waited for.
    NoWait,
    /// The directory service reported the delivery as failed.
    Failed,
}

impl MessageResponse {
    /// Decode the native response code; unmapped values collapse to the
    /// failure sentinel.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Ok,
            2 => Self::Cancel,
            3 => Self::Abort,
            4 => Self::Retry,
            5 => Self::Ignore,
            6 => Self::Yes,
            7 => Self::No,
            10 => Self::TryAgain,
            11 => Self::Continue,
            32000 => Self::Timeout,
            32001 => Self::NoWait,
            _ => Self::Failed,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Ok => 1,
            Self::Cancel => 2,
            Self::Abort => 3,
            Self::Retry => 4,
            Self::Ignore => 5,
            Self::Yes => 6,
            Self::No => 7,
            Self::TryAgain => 10,
            Self::Continue => 11,
            Self::Timeout => 32000,
            Self::NoWait => 32001,
            Self::Failed => 64000,
        }
    }
}

/// Default timeout applied when a message waits for a response but the
/// caller gave none.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for message delivery. With neither field set the message is
/// fire-and-forget; setting either selects the waiting (advanced) mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    pub buttons: Option<MessageButtons>,
    pub timeout: Option<Duration>,
}

impl MessageOptions {
    /// Whether delivery waits for the user's response.
    pub fn is_advanced(&self) -> bool {
        self.buttons.is_some() || self.timeout.is_some()
    }
}

// ─── Dispatch outcomes ───────────────────────────────────────────────

/// Per-target outcome of a dispatched action. Host-level failures are
/// reported with session id 0 and empty user fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub host_name: String,
    pub session_id: u32,
    pub user_name: String,
    pub domain_name: String,
    pub success: bool,
    pub response: Option<MessageResponse>,
    pub error: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────
