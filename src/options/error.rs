// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("no options set matches this scan header")]
    NoMatch,

    #[error("min_tvchannel {min} > max_tvchannel {max}")]
    InvalidTvChannelRange { min: u32, max: u32 },
}
