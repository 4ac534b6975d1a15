pub mod conversation;
pub mod handoff;
pub mod specialist;
