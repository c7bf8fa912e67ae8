/// A 63-bit optional payload pointer and a 1-bit tag packed into one `u64`.
///
/// The low bit holds the tag. The upper 63 bits hold `pointer + 1`, so that zero stands for
/// "no pointer".
#[derive(Clone, Copy, Default, Eq, PartialEq, Debug, Hash)]
pub struct TaggedU64(u64);

impl TaggedU64 {
    /// The largest pointer that can be stored.
    pub const MAX_POINTER: u64 = (u64::MAX >> 1) - 1;

    #[inline(always)]
    pub const fn pointer(self) -> Option<u64> {
        match self.0 >> 1 {
            0 => None,
            p => Some(p - 1),
        }
    }

    #[inline(always)]
    pub const fn tag(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline(always)]
    pub fn set_pointer(&mut self, pointer: Option<u64>) {
        let p = pointer.map_or(0, |p| {
            debug_assert!(p <= Self::MAX_POINTER);
            p + 1
        });
        self.0 = p << 1 | (self.0 & 1);
    }

    #[inline(always)]
    pub fn set_tag(&mut self, tag: bool) {
        self.0 = (self.0 & !1) | u64::from(tag);
    }

    #[inline(always)]
    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline(always)]
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}
