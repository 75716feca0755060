//! Hardware backends for the collaborator traits in [`platform`](crate::platform).

pub mod x86_64;
