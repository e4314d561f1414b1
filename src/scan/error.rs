// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IF index {index} out of range (scan has {num_ifs} IFs)")]
    IfIndexOutOfRange { index: usize, num_ifs: usize },

    #[error("polarization {pol} not present on IF {if_index}")]
    PolNotFound { if_index: usize, pol: String },
}
