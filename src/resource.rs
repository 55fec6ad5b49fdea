//! Shared, explicitly disposed GPU resources.
//!
//! A [`Resource`] is a reference-counted slot holding an optional GPU object (a
//! [`RenderTarget`](crate::render_target::RenderTarget) or a
//! [`DepthTexture`](crate::render_target::DepthTexture)). Clones share the slot: replacing the
//! value through one handle is visible through all of them, and every replacement bumps the
//! slot's revision so that ports holding the resource notice the change on their next sync.
//!
//! Exactly one owner is responsible for resizing and disposing a resource. Any number of
//! [`Input`](crate::port::Input) ports may read it; the reader count they maintain blocks
//! disposal until the last reader lets go.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// GPU objects that can release their backing memory.
pub trait Disposable {
    fn dispose(&self);
}

/// GPU objects with a pixel size.
pub trait Resizable {
    fn size(&self) -> (u32, u32);
    fn set_size(&mut self, width: u32, height: u32);
}

/// Identity of whoever owns a set of resources (a pass or the pipeline).
#[derive(Clone, Default)]
pub struct OwnerToken(Rc<()>);

impl OwnerToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &OwnerToken) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn downgrade(&self) -> Weak<()> {
        Rc::downgrade(&self.0)
    }
}

impl fmt::Debug for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerToken({:p})", Rc::as_ptr(&self.0))
    }
}

struct Slot<T> {
    value: RefCell<Option<T>>,
    revision: Cell<u64>,
    readers: Cell<usize>,
    disposed: Cell<bool>,
    owner: RefCell<Option<Weak<()>>>,
}

/// A shared handle to an optional GPU object.
pub struct Resource<T> {
    slot: Rc<Slot<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("ptr", &Rc::as_ptr(&self.slot))
            .field("revision", &self.slot.revision.get())
            .field("readers", &self.slot.readers.get())
            .field("disposed", &self.slot.disposed.get())
            .finish()
    }
}

impl<T: Disposable> Resource<T> {
    /// Wraps `value` in a new, unowned resource.
    pub fn new(value: T) -> Self {
        Self::from_option(Some(value))
    }

    /// Creates a resource that holds nothing yet.
    pub fn empty() -> Self {
        Self::from_option(None)
    }

    fn from_option(value: Option<T>) -> Self {
        Self {
            slot: Rc::new(Slot {
                value: RefCell::new(value),
                revision: Cell::new(0),
                readers: Cell::new(0),
                disposed: Cell::new(false),
                owner: RefCell::new(None),
            }),
        }
    }

    /// Marks `owner` as the only party allowed to resize or dispose this resource.
    pub fn owned_by(self, owner: &OwnerToken) -> Self {
        *self.slot.owner.borrow_mut() = Some(owner.downgrade());
        self
    }

    pub fn is_owned_by(&self, owner: &OwnerToken) -> bool {
        self.slot
            .owner
            .borrow()
            .as_ref()
            .is_some_and(|weak| Weak::ptr_eq(weak, &owner.downgrade()))
    }

    fn has_owner(&self) -> bool {
        self.slot
            .owner
            .borrow()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    pub fn borrow(&self) -> Ref<'_, Option<T>> {
        self.slot.value.borrow()
    }

    pub fn is_some(&self) -> bool {
        self.slot.value.borrow().is_some()
    }

    /// Runs `f` against the current value, if any.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.slot.value.borrow().as_ref().map(f)
    }

    /// Swaps the held value and returns the previous one without disposing it.
    pub fn replace(&self, value: Option<T>) -> Option<T> {
        debug_assert!(
            !self.slot.disposed.get() || value.is_none(),
            "value assigned to a disposed resource"
        );
        self.bump();
        self.slot.value.replace(value)
    }

    pub fn set(&self, value: T) -> Option<T> {
        self.replace(Some(value))
    }

    pub fn take(&self) -> Option<T> {
        if self.slot.value.borrow().is_none() {
            return None;
        }
        self.replace(None)
    }

    /// Monotonic counter bumped every time the held value is replaced.
    pub fn revision(&self) -> u64 {
        self.slot.revision.get()
    }

    fn bump(&self) {
        self.slot.revision.set(self.slot.revision.get() + 1);
    }

    /// Number of input ports currently reading this resource.
    pub fn readers(&self) -> usize {
        self.slot.readers.get()
    }

    pub(crate) fn acquire_reader(&self) {
        self.slot.readers.set(self.slot.readers.get() + 1);
    }

    pub(crate) fn release_reader(&self) {
        let readers = self.slot.readers.get();
        debug_assert!(readers > 0, "reader released twice");
        self.slot.readers.set(readers.saturating_sub(1));
    }

    pub fn is_disposed(&self) -> bool {
        self.slot.disposed.get()
    }

    /// Releases the held GPU object.
    ///
    /// Idempotent: a second call is a no-op. Disposing while input ports still read the resource
    /// is a programming error; it asserts in debug builds and is ignored in release builds.
    /// Returns `true` only for the call that actually disposed.
    pub fn dispose(&self) -> bool {
        if self.slot.disposed.get() {
            return false;
        }
        if self.readers() > 0 {
            debug_assert!(
                false,
                "resource disposed while {} input(s) still read it",
                self.readers()
            );
            return false;
        }
        self.slot.disposed.set(true);
        if let Some(value) = self.slot.value.replace(None) {
            value.dispose();
            self.bump();
        }
        true
    }

    pub fn ptr_eq(&self, other: &Resource<T>) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Disposable + Resizable> Resource<T> {
    /// Resizes the held value on behalf of `owner`.
    ///
    /// Only the owner may change dimensions; anyone else trips a debug assertion and the call
    /// does nothing. Resources without a live owner belong to whoever created them and accept
    /// any caller. Returns `true` if the size changed.
    pub fn resize(&self, owner: &OwnerToken, width: u32, height: u32) -> bool {
        if self.has_owner() && !self.is_owned_by(owner) {
            debug_assert!(false, "resource resized outside its owner");
            return false;
        }
        let mut value = self.slot.value.borrow_mut();
        match value.as_mut() {
            Some(v) if v.size() != (width, height) => {
                v.set_size(width, height);
                true
            }
            _ => false,
        }
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.with(|v| v.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tracked {
        disposals: Rc<Cell<u32>>,
        size: (u32, u32),
    }

    impl Disposable for Tracked {
        fn dispose(&self) {
            self.disposals.set(self.disposals.get() + 1);
        }
    }

    impl Resizable for Tracked {
        fn size(&self) -> (u32, u32) {
            self.size
        }
        fn set_size(&mut self, width: u32, height: u32) {
            self.size = (width, height);
        }
    }

    fn tracked() -> (Tracked, Rc<Cell<u32>>) {
        let counter = Rc::new(Cell::new(0));
        (
            Tracked {
                disposals: counter.clone(),
                size: (1, 1),
            },
            counter,
        )
    }

    #[test]
    fn clones_share_the_slot() {
        let (value, _) = tracked();
        let a = Resource::new(value);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        a.take();
        assert!(!b.is_some());
    }

    #[test]
    fn replacing_bumps_the_revision() {
        let (first, _) = tracked();
        let (second, _) = tracked();
        let res = Resource::new(first);
        let before = res.revision();
        res.set(second);
        assert!(res.revision() > before);
    }

    #[test]
    fn dispose_is_idempotent() {
        let (value, counter) = tracked();
        let res = Resource::new(value);
        assert!(res.dispose());
        assert!(!res.dispose());
        assert_eq!(counter.get(), 1);
        assert!(res.is_disposed());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "still read it")]
    fn disposing_a_read_resource_asserts() {
        let (value, _) = tracked();
        let res = Resource::new(value);
        res.acquire_reader();
        res.dispose();
    }

    #[test]
    fn owner_can_resize() {
        let owner = OwnerToken::new();
        let (value, _) = tracked();
        let res = Resource::new(value).owned_by(&owner);
        assert!(res.resize(&owner, 800, 600));
        assert_eq!(res.size(), Some((800, 600)));
        assert!(!res.resize(&owner, 800, 600));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside its owner")]
    fn foreign_resize_asserts() {
        let owner = OwnerToken::new();
        let stranger = OwnerToken::new();
        let (value, _) = tracked();
        let res = Resource::new(value).owned_by(&owner);
        res.resize(&stranger, 2, 2);
    }

    #[test]
    fn orphaned_resources_accept_any_resizer() {
        let (value, _) = tracked();
        let res = {
            let owner = OwnerToken::new();
            Resource::new(value).owned_by(&owner)
        };
        assert!(res.resize(&OwnerToken::new(), 4, 4));
    }
}
