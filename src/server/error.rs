// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a computation is already in flight for this client's username group")]
    Overload,

    #[error("server is shutting down and refuses new work")]
    ShuttingDown,

    #[error("{0}")]
    Kernel(#[from] crate::kernel::KernelError),
}
