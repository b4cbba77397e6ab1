/// A byte position inside an [`crate::arena::Arena`], relative to its base.
///
/// `NULL` is the distinguished sentinel denoting absence. Translation to and
/// from a raw pointer is a total bijection over valid offsets: `base +
/// offset` and `address - base`.
///
/// ```
/// use mixer_vat::offset::Offset;
///
/// assert!(Offset::NULL.is_null());
/// assert!(!Offset::new(8).is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(u32);

impl Offset {
    pub const NULL: Offset = Offset(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for Offset {
    fn default() -> Self {
        Self::NULL
    }
}

impl From<u32> for Offset {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
