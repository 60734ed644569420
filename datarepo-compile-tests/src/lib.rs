//! Compile checks for the datarepo derives; see `tests/compile.rs`.
