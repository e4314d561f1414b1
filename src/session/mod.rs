// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Per-client session state (§4.F) and the runtime's client table (§4.E
"Client accounting"). A session is destroyed on disconnect; the table is
keyed by client ID and supports username-group lookup for broadcast.
*/

use crate::options::OptionsSet;
use crate::protocol::{ClientType, Response};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

pub mod error;
#[cfg(test)]
mod test;

pub use error::SessionError;

/// One connected client: identity, its most recently sent options (used to
/// short-circuit a `COMPUTE_VISDATA` that merely restates current state),
/// a pending-computation flag, and its outbound send queue.
pub struct ClientSession {
    pub id: String,
    pub username: String,
    pub client_type: ClientType,
    pub last_options: Vec<OptionsSet>,
    pub pending: bool,
    sender: UnboundedSender<Response>,
}

impl ClientSession {
    pub fn new(id: String, client_type: ClientType, sender: UnboundedSender<Response>) -> Self {
        ClientSession { id, username: String::new(), client_type, last_options: Vec::new(), pending: false, sender }
    }

    pub fn send(&self, response: Response) -> Result<(), SessionError> {
        self.sender.send(response).map_err(|_| SessionError::QueueClosed)
    }
}

/// The runtime's client table, keyed by client ID. `order` preserves
/// connection-accept order, which is also broadcast order (§5).
#[derive(Default)]
pub struct SessionTable {
    by_id: HashMap<String, ClientSession>,
    order: Vec<String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: ClientSession) {
        self.order.push(session.id.clone());
        self.by_id.insert(session.id.clone(), session);
    }

    pub fn remove(&mut self, id: &str) -> Option<ClientSession> {
        self.order.retain(|existing| existing != id);
        self.by_id.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&ClientSession> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ClientSession> {
        self.by_id.get_mut(id)
    }

    pub fn set_username(&mut self, id: &str, username: String) -> Result<(), SessionError> {
        let session = self.by_id.get_mut(id).ok_or_else(|| SessionError::UnknownClient(id.to_string()))?;
        session.username = username;
        Ok(())
    }

    /// Every session with `username`, in connection-accept order.
    pub fn by_username<'a>(&'a self, username: &'a str) -> impl Iterator<Item = &'a ClientSession> + 'a {
        self.order.iter().filter_map(move |id| self.by_id.get(id)).filter(move |s| s.username == username)
    }

    /// All sessions, in connection-accept order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = &ClientSession> {
        self.order.iter().filter_map(move |id| self.by_id.get(id))
    }

    /// Sends `response` to every session sharing `username`, optionally
    /// excluding one client ID (used for "every client in the group except
    /// the triggerer", §4.E). Errors from an individual dead queue are
    /// swallowed — that client's disconnect is handled by its own task.
    pub fn broadcast_to_group(&self, username: &str, exclude_id: Option<&str>, response: &Response) {
        for session in self.by_username(username) {
            if Some(session.id.as_str()) == exclude_id {
                continue;
            }
            let _ = session.send(response.clone());
        }
    }
}
