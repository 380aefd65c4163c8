//! Host-grouped concurrent action dispatch.
//!
//! Targets are partitioned by host, each group gets one handle (opening a
//! handle is the expensive step; the directory service multiplexes queries
//! on it), and the action fans out concurrently across the group's
//! sessions. Outcomes are collected by input index so per-group order is
//! deterministic even though the work completes out of order. One target's
//! failure never aborts its siblings or other groups; a host whose handle
//! cannot be opened yields exactly one error outcome for the whole group.

use crate::directory::{HostHandle, SessionDirectory};
use crate::messaging;
use crate::types::{
    DispatchOutcome, MessageOptions, MessageResponse, SessionIdentity, SessionInfo, WtsResult,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task;

/// The administrative action applied to every target of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionAction {
    /// Detach the client, leaving the session alive.
    Disconnect { wait: bool },
    /// Terminate the session.
    Logoff { wait: bool },
    /// Show a message box in the session.
    SendMessage {
        title: String,
        body: String,
        options: MessageOptions,
    },
}

/// How a target was specified: a record from a prior enumeration, or an
/// explicit host + session id. Both resolve to the same canonical form
/// before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionTarget {
    Info(SessionInfo),
    Identity(SessionIdentity),
}

impl SessionTarget {
    pub fn identity(&self) -> SessionIdentity {
        match self {
            Self::Info(info) => info.identity(),
            Self::Identity(identity) => identity.clone(),
        }
    }

    /// Whether an interactive message can reach this target. Only targets
    /// carrying a known state can be ruled out; bare identities are always
    /// attempted.
    pub fn accepts_messages(&self) -> bool {
        match self {
            Self::Info(info) => !info.state.is_inactive(),
            Self::Identity(_) => true,
        }
    }

    fn resolve(self) -> ResolvedTarget {
        match self {
            Self::Info(info) => ResolvedTarget {
                host_name: info.host_name,
                session_id: info.session_id,
                user_name: info.user_name,
                domain_name: info.domain_name,
            },
            Self::Identity(identity) => ResolvedTarget {
                host_name: identity.host_name,
                session_id: identity.session_id,
                user_name: String::new(),
                domain_name: String::new(),
            },
        }
    }
}

impl From<SessionInfo> for SessionTarget {
    fn from(info: SessionInfo) -> Self {
        Self::Info(info)
    }
}

impl From<SessionIdentity> for SessionTarget {
    fn from(identity: SessionIdentity) -> Self {
        Self::Identity(identity)
    }
}

/// Canonical dispatch target: identity plus whatever user attribution the
/// caller supplied, echoed back in the outcome.
#[derive(Debug, Clone)]
struct ResolvedTarget {
    host_name: String,
    session_id: u32,
    user_name: String,
    domain_name: String,
}

impl ResolvedTarget {
    fn outcome(
        &self,
        success: bool,
        response: Option<MessageResponse>,
        error: Option<String>,
    ) -> DispatchOutcome {
        DispatchOutcome {
            host_name: self.host_name.clone(),
            session_id: self.session_id,
            user_name: self.user_name.clone(),
            domain_name: self.domain_name.clone(),
            success,
            response,
            error,
        }
    }
}

/// Applies one action to many sessions across many hosts.
pub struct Dispatcher<D: SessionDirectory + 'static> {
    dir: Arc<D>,
}

impl<D: SessionDirectory + 'static> Dispatcher<D> {
    pub fn new(dir: Arc<D>) -> Self {
        Self { dir }
    }

    /// Apply `action` to every target. Always yields one outcome per
    /// target, except that a host whose handle cannot be opened yields a
    /// single outcome for its whole group. Order across host groups is
    /// unspecified; within a group, input order is preserved.
    pub async fn dispatch(
        &self,
        targets: Vec<SessionTarget>,
        action: SessionAction,
    ) -> Vec<DispatchOutcome> {
        let groups = group_by_host(targets);
        let mut group_tasks = Vec::with_capacity(groups.len());
        for (host, members) in groups {
            group_tasks.push(task::spawn(run_host_group(
                Arc::clone(&self.dir),
                host,
                members,
                action.clone(),
            )));
        }

        let mut outcomes = Vec::new();
        for group in group_tasks {
            match group.await {
                Ok(mut group_outcomes) => outcomes.append(&mut group_outcomes),
                Err(err) => warn!("host group task failed: {err}"),
            }
        }
        outcomes
    }
}

/// Buffered dispatch: targets accumulate during a receive phase and are
/// drained in one grouped batch.
pub struct DispatchQueue<D: SessionDirectory + 'static> {
    dispatcher: Dispatcher<D>,
    buffered: Vec<SessionTarget>,
}

impl<D: SessionDirectory + 'static> DispatchQueue<D> {
    pub fn new(dir: Arc<D>) -> Self {
        Self {
            dispatcher: Dispatcher::new(dir),
            buffered: Vec::new(),
        }
    }

    pub fn push(&mut self, target: impl Into<SessionTarget>) {
        self.buffered.push(target.into());
    }

    /// Buffer a target for interactive delivery. Targets known to have no
    /// client attached are dropped; returns whether the target was kept.
    pub fn push_if_reachable(&mut self, target: impl Into<SessionTarget>) -> bool {
        let target = target.into();
        if !target.accepts_messages() {
            debug!(
                "skipping session {}: no client attached",
                target.identity()
            );
            return false;
        }
        self.buffered.push(target);
        true
    }

    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    /// Drain every buffered target into one dispatch.
    pub async fn dispatch(&mut self, action: SessionAction) -> Vec<DispatchOutcome> {
        let targets = std::mem::take(&mut self.buffered);
        self.dispatcher.dispatch(targets, action).await
    }
}

/// Partition targets by host, preserving each group's member order and
/// the order in which hosts first appear.
fn group_by_host(targets: Vec<SessionTarget>) -> Vec<(String, Vec<ResolvedTarget>)> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<ResolvedTarget>)> = Vec::new();
    for target in targets {
        let resolved = target.resolve();
        let slot = match slots.get(&resolved.host_name) {
            Some(&slot) => slot,
            None => {
                slots.insert(resolved.host_name.clone(), groups.len());
                groups.push((resolved.host_name.clone(), Vec::new()));
                groups.len() - 1
            }
        };
        groups[slot].1.push(resolved);
    }
    groups
}

async fn run_host_group<D: SessionDirectory + 'static>(
    dir: Arc<D>,
    host: String,
    members: Vec<ResolvedTarget>,
    action: SessionAction,
) -> Vec<DispatchOutcome> {
    let open_host = host.clone();
    let opened = task::spawn_blocking(move || HostHandle::open(dir, &open_host)).await;
    let handle = match opened {
        Ok(Ok(handle)) => Arc::new(handle),
        Ok(Err(err)) => {
            // One outcome for the whole group; no per-session attempts.
            return vec![host_failure_outcome(&host, &err.to_string())];
        }
        Err(err) => return vec![host_failure_outcome(&host, &err.to_string())],
    };

    info!("dispatching to {} session(s) on {host}", members.len());
    let mut session_tasks = Vec::with_capacity(members.len());
    for member in members {
        let handle = Arc::clone(&handle);
        let action = action.clone();
        let context = member.clone();
        let join = task::spawn_blocking(move || apply_action(&handle, &member, &action));
        session_tasks.push((context, join));
    }

    // Join in input order so intra-group outcomes stay deterministic.
    let mut outcomes = Vec::with_capacity(session_tasks.len());
    for (context, join) in session_tasks {
        let outcome = match join.await {
            Ok(outcome) => outcome,
            Err(err) => context.outcome(false, None, Some(format!("action task failed: {err}"))),
        };
        outcomes.push(outcome);
    }
    // Last reference: the handle closes only after every session task in
    // the group has joined.
    drop(handle);
    outcomes
}

fn host_failure_outcome(host: &str, error: &str) -> DispatchOutcome {
    DispatchOutcome {
        host_name: host.to_string(),
        session_id: 0,
        user_name: String::new(),
        domain_name: String::new(),
        success: false,
        response: None,
        error: Some(error.to_string()),
    }
}

fn apply_action<D: SessionDirectory>(
    handle: &HostHandle<D>,
    target: &ResolvedTarget,
    action: &SessionAction,
) -> DispatchOutcome {
    match action {
        SessionAction::Disconnect { wait } => {
            let result = handle
                .directory()
                .disconnect(handle.raw(), target.session_id, *wait);
            plain_outcome(target, "disconnected", result)
        }
        SessionAction::Logoff { wait } => {
            let result = handle
                .directory()
                .logoff(handle.raw(), target.session_id, *wait);
            plain_outcome(target, "logged off", result)
        }
        SessionAction::SendMessage {
            title,
            body,
            options,
        } => match messaging::send_message(handle, target.session_id, title, body, options) {
            Ok(response) => {
                let success = messaging::message_success(options, response);
                let error = (response == MessageResponse::Failed)
                    .then(|| "message delivery failed".to_string());
                target.outcome(success, Some(response), error)
            }
            Err(err) => target.outcome(false, None, Some(err.to_string())),
        },
    }
}

fn plain_outcome(
    target: &ResolvedTarget,
    verb: &str,
    result: WtsResult<()>,
) -> DispatchOutcome {
    match result {
        Ok(()) => {
            debug!(
                "{verb} session {} on {}",
                target.session_id, target.host_name
            );
            target.outcome(true, None, None)
        }
        Err(err) => target.outcome(false, None, Some(err.to_string())),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
