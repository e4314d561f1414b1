// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An interactive, networked radio-interferometer correlator visibility
//! computation and distribution server: scan/cycle data model, option-set
//! calibration rules, the amp-phase reduction kernel, a self-describing wire
//! codec, the `viscorrd` protocol, client sessions, the async server
//! runtime, and on-disk vis-data snapshots.

pub mod codec;
pub mod error;
pub mod kernel;
pub mod options;
pub mod protocol;
pub mod scan;
pub mod server;
pub mod session;
pub mod snapshot;

pub use error::VisError;
