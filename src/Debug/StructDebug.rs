use std::fmt;

use crate::Actor::context::Context;
use crate::Core::coroutine::CoEnv;
use crate::MPMC::global::GlobalQueue;
use crate::MPMC::inbox::Inbox;
use crate::MPMC::Buffer::RingBuffer;

/// Debug function for Inbox
///
/// Takes the inbox lock once and shows:
/// - Owner address
/// - Pending message count
/// - Scheduling flags
pub fn debug_inbox(inbox: &Inbox, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = inbox.state.lock();
    f.debug_struct("Inbox")
        .field("address", &inbox.address())
        .field("len", &state.queue.len())
        .field("in_global", &state.in_global)
        .field("release", &state.release)
        .finish()
}

/// Debug function for GlobalQueue
pub fn debug_global_queue(queue: &GlobalQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GlobalQueue")
        .field("len", &queue.len())
        .finish_non_exhaustive()
}

/// Debug function for RingBuffer
///
/// Shows occupancy only; slot contents are never read.
pub fn debug_ring_buffer<T>(buffer: &RingBuffer<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuffer")
        .field("capacity", &buffer.capacity())
        .field("len", &buffer.len())
        .finish_non_exhaustive()
}

/// Debug function for Context
pub fn debug_context(ctx: &Context, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
        .field("address", &ctx.address())
        .field("module", &ctx.module_name())
        .field("message_count", &ctx.message_count())
        .field("in_dispatch", &ctx.in_dispatch())
        .field("endless", &ctx.is_endless())
        .finish_non_exhaustive()
}

pub fn debug_co_env(env: &CoEnv, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoEnv")
        .field("live", &env.live())
        .field("capacity", &env.capacity())
        .field("running", &env.current())
        .field("stack_size", &env.stack_size())
        .finish()
}
