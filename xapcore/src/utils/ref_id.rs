use std::{ops::Deref, sync::Arc};

/// Identity wrapper: two `RefId` are equal when they point at the same allocation, whatever
/// the pointee's content.
#[derive(Debug)]
pub struct RefId<U: ?Sized, T: AsRef<U>> {
    inner: T,
    _phantom: std::marker::PhantomData<fn() -> Box<U>>,
}

impl<U: ?Sized, T: AsRef<U>> RefId<U, T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn borrow_inner(&self) -> &T {
        &self.inner
    }

    pub fn take(self) -> T {
        self.inner
    }

    fn addr(&self) -> *const () {
        self.inner.as_ref() as *const U as *const ()
    }
}

impl<U: ?Sized, T: AsRef<U> + Clone> Clone for RefId<U, T> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl<U: ?Sized, T: AsRef<U>> AsRef<U> for RefId<U, T> {
    fn as_ref(&self) -> &U {
        self.inner.as_ref()
    }
}

impl<U: ?Sized, T: AsRef<U>> Deref for RefId<U, T> {
    type Target = U;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl<U: ?Sized, T: AsRef<U>> PartialEq for RefId<U, T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl<U: ?Sized, T: AsRef<U>> Eq for RefId<U, T> {}

impl<U: ?Sized, T: AsRef<U>> PartialOrd for RefId<U, T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<U: ?Sized, T: AsRef<U>> Ord for RefId<U, T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<U: ?Sized, T: AsRef<U>> std::hash::Hash for RefId<U, T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

pub type ArcRefId<U> = RefId<U, Arc<U>>;

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equality_is_pointer_identity() {
        let a = ArcRefId::new(Arc::new(5));
        let b = ArcRefId::new(Arc::new(5));
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b, "same content, different allocation");

        let set: HashSet<_> = [a, a2, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
