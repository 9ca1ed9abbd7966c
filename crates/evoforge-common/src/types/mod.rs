//! Core data types for Evoforge

pub mod agent;
pub mod fitness;
pub mod mutation;
pub mod population;
pub mod task;

/// Defines a UUIDv7-backed identifier newtype.
///
/// v7 ids are time-ordered, and the derived `Ord` makes the
/// "lowest id wins" tie-breaks deterministic.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            /// Generate a fresh identifier
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(id: uuid::Uuid) -> Self {
                Self(id)
            }
        }
    };
}

pub(crate) use define_id;

define_id!(
    /// Archive entry identifier
    EntryId
);

define_id!(
    /// Population identifier
    PopulationId
);

define_id!(
    /// Evolution cycle identifier
    CycleId
);
