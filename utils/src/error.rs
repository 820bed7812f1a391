// Copyright 2020 Ant Group. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A small helper macro for turning a foreign error into `std::io::Error`.
//!
//! Mirrors `nydus-utils`'s `eother!`; used wherever a lower layer needs to
//! fold some other crate's error type into the `io::Result` its trait
//! signature already committed to (see `stargz_storage::Blob::read_section`).

/// Build an `io::Error` with `ErrorKind::Other`, wrapping any displayable cause.
#[macro_export]
macro_rules! eother {
    ($err:expr) => {
        std::io::Error::new(std::io::ErrorKind::Other, format!("{}", $err))
    };
}
