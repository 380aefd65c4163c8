//! Interactive message delivery to session desktops.
//!
//! Two modes, selected by [`MessageOptions`]:
//!
//! - *simple* (no buttons, no timeout): fire-and-forget with a single OK
//!   button; the call returns as soon as delivery is queued
//! - *advanced* (either option set): blocks until the user responds or the
//!   timeout elapses, returning the specific response

use crate::directory::{HostHandle, SessionDirectory};
use crate::types::{
    MessageButtons, MessageOptions, MessageResponse, WtsResult, DEFAULT_MESSAGE_TIMEOUT,
};
use log::info;

/// Display a message box in one session.
pub fn send_message<D: SessionDirectory>(
    handle: &HostHandle<D>,
    session_id: u32,
    title: &str,
    body: &str,
    options: &MessageOptions,
) -> WtsResult<MessageResponse> {
    let dir = handle.directory();
    let raw = if options.is_advanced() {
        let buttons = options.buttons.unwrap_or_default();
        let timeout = options.timeout.unwrap_or(DEFAULT_MESSAGE_TIMEOUT);
        info!(
            "sending message to session {session_id} on {} ({buttons:?}, {}s timeout)",
            handle.host_name(),
            timeout.as_secs()
        );
        dir.send_message(
            handle.raw(),
            session_id,
            title,
            body,
            buttons.style_bits(),
            timeout.as_secs() as u32,
            true,
        )?
    } else {
        info!(
            "sending message to session {session_id} on {} (fire-and-forget)",
            handle.host_name()
        );
        dir.send_message(
            handle.raw(),
            session_id,
            title,
            body,
            MessageButtons::Ok.style_bits(),
            0,
            false,
        )?
    };
    Ok(MessageResponse::from_raw(raw))
}

/// Whether a response counts as a successful delivery under the given
/// options: fire-and-forget succeeds unless the service reported failure;
/// a waiting send additionally requires an actual user response, so a
/// timeout is not a success.
pub fn message_success(options: &MessageOptions, response: MessageResponse) -> bool {
    if options.is_advanced() {
        !matches!(response, MessageResponse::Failed | MessageResponse::Timeout)
    } else {
        response != MessageResponse::Failed
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
