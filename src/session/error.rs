// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no client registered with id {0}")]
    UnknownClient(String),

    #[error("client send queue closed")]
    QueueClosed,
}
