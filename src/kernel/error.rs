// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("IF index {0} out of range for this scan header")]
    BadSelectionIf(usize),

    #[error("polarization {0} not present on the requested IF")]
    BadSelectionPol(String),

    #[error("min_tvchannel/max_tvchannel out of range for {num_channels} channels")]
    BadSelectionChannelRange { num_channels: u32 },
}
