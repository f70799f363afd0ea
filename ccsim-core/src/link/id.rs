use std::fmt;

/// Unique identifier of a point-to-point link.
///
/// Links are numbered in installation order, so the first link installed
/// in a [`Network`] is always `link#0`.
///
/// [`Network`]: crate::network::Network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(u32);

impl LinkId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}
