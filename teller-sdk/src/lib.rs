//! Wire objects shared between the teller server and its callers.

pub mod objects;
