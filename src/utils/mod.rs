pub(crate) mod once;
pub(crate) mod slab;

pub(crate) use once::{once0, once1, once2};
pub(crate) use slab::Slab;
