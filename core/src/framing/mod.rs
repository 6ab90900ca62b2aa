pub mod buffer;
pub mod chunker;
pub mod dispatcher;
pub mod reassembler;
pub mod receiver;

pub use buffer::ReassemblyBuffer;
pub use chunker::chunk;
pub use dispatcher::Dispatcher;
pub use reassembler::{ReassemblyState, Reassembler};
pub use receiver::Receiver;
