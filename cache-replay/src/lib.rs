
mod block_file;
mod sched;
mod trace;

pub use self::{
    block_file::BlockFile,
    sched::ThreadScheduler,
    trace::{Op, parse_trace, replay},
};
