//! Static per-kind, per-version schema tables and the projection rules
//! between API versions. The tables are data; validation and projection
//! walk them.

mod catalogue;
mod transforms;

pub use catalogue::{fields_for, validate, FieldShape, FieldSpec};
pub use transforms::{downgrade, legalise, strip_metadata, stored_version, API_VERSION_ATTR};
