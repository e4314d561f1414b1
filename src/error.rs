// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Crate-wide error aggregate.

use thiserror::Error;

/// Top-level error type. Every submodule defines its own error enum; this
/// aggregates them with `#[from]` the same way `mwalib::error::MwalibError`
/// aggregates its submodule errors.
#[derive(Error, Debug)]
pub enum VisError {
    #[error("{0}")]
    Scan(#[from] crate::scan::ScanError),

    #[error("{0}")]
    Options(#[from] crate::options::OptionsError),

    #[error("{0}")]
    Kernel(#[from] crate::kernel::KernelError),

    #[error("{0}")]
    Codec(#[from] crate::codec::CodecError),

    #[error("{0}")]
    Server(#[from] crate::server::ServerError),

    #[error("{0}")]
    Snapshot(#[from] crate::snapshot::SnapshotError),

    #[error("{0}")]
    Session(#[from] crate::session::SessionError),
}
