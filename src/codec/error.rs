// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("array length {actual} disagrees with expected length {expected}")]
    DecodeLength { expected: usize, actual: usize },

    #[error("unexpected field tag/value while decoding {context}")]
    DecodeValue { context: String },

    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),
}
