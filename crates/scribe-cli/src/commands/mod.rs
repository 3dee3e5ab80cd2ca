pub(crate) mod admin;
pub(crate) mod files;
pub(crate) mod versions;
