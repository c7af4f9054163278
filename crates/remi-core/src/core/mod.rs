mod address;
mod info;
pub(crate) mod macros;
mod memory_access;
mod state;

pub use self::{
    address::{ProcessId, RemoteAddress},
    info::RemiInfo,
    memory_access::MemoryAccess,
    state::AttachState,
};
