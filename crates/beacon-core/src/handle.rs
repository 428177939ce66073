//! Stable handles into the responder's tables.
//!
//! Handles are `prefix_N` identifiers drawn from one monotonically increasing
//! counter and never reused, so a handle that outlives its object simply
//! stops resolving instead of aliasing a newer one.

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw numeric value of this handle.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

pub(crate) use define_handle;
