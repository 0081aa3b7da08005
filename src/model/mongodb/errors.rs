//! The mongodb crate doesn't expose server error codes as constants,
//! so the ones we care about live here.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error,
/// i.e. a unique index rejected the write.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(ref e)) = *err.kind {
        return e.code == DUPLICATE_KEY;
    }
    false
}
