//! Command-list state and CPU/GPU fence synchronization.

use crate::backend::Backend;
use crate::barrier::{Barrier, DeferredBarriers, QueueKind};
use crate::error::{GpuError, Result};

/// Whether the single command list accepts recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandListState {
    Open,
    Closed,
}

/// Owns the command-list state, the fence counter and the deferred barrier
/// slots.
///
/// Only one frame is ever outstanding: [`wait_for_gpu`](Self::wait_for_gpu)
/// blocks until everything submitted so far has finished.
pub struct FrameSynchronizer<B: Backend + ?Sized> {
    state: CommandListState,
    fence_value: u64,
    pending: DeferredBarriers<B>,
}

impl<B: Backend + ?Sized> Default for FrameSynchronizer<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend + ?Sized> FrameSynchronizer<B> {
    /// Closed list, fence value 1.
    pub fn new() -> Self {
        Self {
            state: CommandListState::Closed,
            fence_value: 1,
            pending: DeferredBarriers::new(),
        }
    }

    pub const fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CommandListState::Open
    }

    /// The value the next [`wait_for_gpu`](Self::wait_for_gpu) signals.
    pub const fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Flush pending barriers, close the list and execute it.
    pub fn submit(&mut self, backend: &mut B) -> Result<()> {
        if self.state == CommandListState::Closed {
            return Err(GpuError::InvalidState(
                "submit called with the command list already closed".to_string(),
            ));
        }
        self.pending.flush_all(backend);
        backend.execute_command_list()?;
        self.state = CommandListState::Closed;
        Ok(())
    }

    /// Signal the fence and block until the GPU reaches it.
    pub fn wait_for_gpu(&mut self, backend: &mut B) -> Result<()> {
        let value = self.fence_value;
        backend.signal(value)?;
        backend.wait(value)?;
        self.fence_value += 1;
        Ok(())
    }

    /// Reopen the command list.
    pub fn reset(&mut self, backend: &mut B) -> Result<()> {
        backend.reset_command_list()?;
        self.state = CommandListState::Open;
        Ok(())
    }

    /// Replace the pending barrier for `queue`.
    pub fn set_pending_barrier(&mut self, queue: QueueKind, barrier: Barrier<B>) {
        self.pending.set(queue, barrier);
    }

    pub fn pending_barrier(&self, queue: QueueKind) -> Option<Barrier<B>> {
        self.pending.pending(queue)
    }

    /// Record the pending barrier for `queue`, if any.
    pub fn flush_pending(&mut self, backend: &mut B, queue: QueueKind) {
        self.pending.flush(backend, queue);
    }

    /// Submit any open work and wait for it. Used before tearing resources
    /// down.
    pub fn drain(&mut self, backend: &mut B) -> Result<()> {
        if self.is_open() {
            self.submit(backend)?;
        }
        self.wait_for_gpu(backend)
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::barrier::ResourceState;
    use crate::headless::{Command, HeadlessBackend};
    use prism_core::Extent;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(Extent::new(4, 4))
    }

    #[test]
    fn fence_starts_at_one_and_advances() {
        let mut backend = backend();
        let mut frame = FrameSynchronizer::new();
        assert_eq!(frame.fence_value(), 1);

        frame.wait_for_gpu(&mut backend).unwrap();
        frame.wait_for_gpu(&mut backend).unwrap();

        assert_eq!(frame.fence_value(), 3);
        assert_eq!(backend.completed_fence_value(), 2);
    }

    #[test]
    fn submit_while_closed_is_an_error() {
        let mut backend = backend();
        let mut frame = FrameSynchronizer::new();
        assert!(matches!(
            frame.submit(&mut backend),
            Err(GpuError::InvalidState(_))
        ));

        frame.reset(&mut backend).unwrap();
        frame.submit(&mut backend).unwrap();
        assert_eq!(frame.state(), CommandListState::Closed);
        assert!(frame.submit(&mut backend).is_err());
    }

    #[test]
    fn later_pending_barrier_overwrites_earlier() {
        let mut backend = backend();
        let swap = backend.swap_target();
        let mut frame = FrameSynchronizer::new();
        frame.reset(&mut backend).unwrap();

        frame.set_pending_barrier(
            QueueKind::Graphics,
            Barrier::texture(swap, ResourceState::Present, ResourceState::CopyDest),
        );
        let last = Barrier::texture(swap, ResourceState::CopyDest, ResourceState::ShaderResource);
        frame.set_pending_barrier(QueueKind::Graphics, last);
        assert_eq!(frame.pending_barrier(QueueKind::Graphics), Some(last));

        frame.submit(&mut backend).unwrap();
        assert_eq!(frame.pending_barrier(QueueKind::Graphics), None);

        let submitted = backend.submissions().last().unwrap();
        assert_eq!(submitted.len(), 1);
        assert!(matches!(
            &submitted[0],
            Command::Barriers(barriers) if barriers.len() == 1
        ));
    }
}
