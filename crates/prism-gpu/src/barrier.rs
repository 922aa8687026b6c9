//! Resource states, barriers and deferred barrier slots.

use crate::backend::Backend;

/// Usage state a resource must be in before the GPU touches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    ShaderResource,
    UnorderedAccess,
    CopySource,
    CopyDest,
    GenericRead,
    AccelerationStructure,
}

/// The resource a barrier applies to.
pub enum BarrierTarget<B: Backend + ?Sized> {
    Texture(B::Texture),
    Buffer(B::Buffer),
    AccelerationStructure(B::AccelerationStructure),
}

impl<B: Backend + ?Sized> Clone for BarrierTarget<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend + ?Sized> Copy for BarrierTarget<B> {}

impl<B: Backend + ?Sized> PartialEq for BarrierTarget<B> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Texture(a), Self::Texture(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a == b,
            (Self::AccelerationStructure(a), Self::AccelerationStructure(b)) => a == b,
            _ => false,
        }
    }
}

impl<B: Backend + ?Sized> std::fmt::Debug for BarrierTarget<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Texture(t) => f.debug_tuple("Texture").field(t).finish(),
            Self::Buffer(b) => f.debug_tuple("Buffer").field(b).finish(),
            Self::AccelerationStructure(a) => {
                f.debug_tuple("AccelerationStructure").field(a).finish()
            }
        }
    }
}

/// A resource barrier.
pub enum Barrier<B: Backend + ?Sized> {
    /// Move `target` from `before` to `after`.
    Transition {
        target: BarrierTarget<B>,
        before: ResourceState,
        after: ResourceState,
    },
    /// Order unordered-access writes to `target` before later accesses.
    Uav { target: BarrierTarget<B> },
}

impl<B: Backend + ?Sized> Barrier<B> {
    pub const fn transition(
        target: BarrierTarget<B>,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        Self::Transition {
            target,
            before,
            after,
        }
    }

    pub const fn texture(texture: B::Texture, before: ResourceState, after: ResourceState) -> Self {
        Self::transition(BarrierTarget::Texture(texture), before, after)
    }

    pub const fn uav(target: BarrierTarget<B>) -> Self {
        Self::Uav { target }
    }

    pub fn target(&self) -> BarrierTarget<B> {
        match *self {
            Self::Transition { target, .. } | Self::Uav { target } => target,
        }
    }
}

impl<B: Backend + ?Sized> Clone for Barrier<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend + ?Sized> Copy for Barrier<B> {}

impl<B: Backend + ?Sized> PartialEq for Barrier<B> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Transition {
                    target: ta,
                    before: ba,
                    after: aa,
                },
                Self::Transition {
                    target: tb,
                    before: bb,
                    after: ab,
                },
            ) => ta == tb && ba == bb && aa == ab,
            (Self::Uav { target: a }, Self::Uav { target: b }) => a == b,
            _ => false,
        }
    }
}

impl<B: Backend + ?Sized> std::fmt::Debug for Barrier<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transition {
                target,
                before,
                after,
            } => f
                .debug_struct("Transition")
                .field("target", target)
                .field("before", before)
                .field("after", after)
                .finish(),
            Self::Uav { target } => f.debug_struct("Uav").field("target", target).finish(),
        }
    }
}

/// Queue a deferred barrier belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Copy,
}

impl QueueKind {
    pub const ALL: [Self; 2] = [Self::Graphics, Self::Copy];

    const fn slot(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Copy => 1,
        }
    }
}

/// One pending barrier per queue kind.
///
/// A later [`set`](Self::set) overwrites the earlier barrier of the same
/// kind; callers that must not lose a barrier flush first.
pub struct DeferredBarriers<B: Backend + ?Sized> {
    slots: [Option<Barrier<B>>; 2],
}

impl<B: Backend + ?Sized> Default for DeferredBarriers<B> {
    fn default() -> Self {
        Self { slots: [None, None] }
    }
}

impl<B: Backend + ?Sized> DeferredBarriers<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, queue: QueueKind, barrier: Barrier<B>) {
        self.slots[queue.slot()] = Some(barrier);
    }

    pub fn pending(&self, queue: QueueKind) -> Option<Barrier<B>> {
        self.slots[queue.slot()]
    }

    /// Remove and return the pending barrier for `queue`.
    pub fn take(&mut self, queue: QueueKind) -> Option<Barrier<B>> {
        self.slots[queue.slot()].take()
    }

    /// Record the pending barrier for `queue`, if any, and clear the slot.
    pub fn flush(&mut self, backend: &mut B, queue: QueueKind) {
        if let Some(barrier) = self.take(queue) {
            backend.cmd_barriers(std::slice::from_ref(&barrier));
        }
    }

    /// Flush every queue kind, graphics first.
    pub fn flush_all(&mut self, backend: &mut B) {
        for queue in QueueKind::ALL {
            self.flush(backend, queue);
        }
    }
}
