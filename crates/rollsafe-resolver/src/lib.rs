mod resolve;

pub use resolve::{newer_release, unix_now, PackageResolver};
