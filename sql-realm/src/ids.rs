//! Typed indices into the realm arenas.
//!
//! All object graphs in a [`Realm`](crate::Realm) are flat `Vec`s, and
//! references between objects are plain `u32` indices wrapped in newtypes so
//! they cannot be mixed up. Ids are only meaningful together with the realm
//! they were issued by.

macro_rules! realm_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

realm_id!(
    /// Index of a schema (namespace) in a realm.
    SchemaId
);
realm_id!(
    /// Index of a table in a realm.
    TableId
);
realm_id!(
    /// Index of a column in a realm.
    ColumnId
);
realm_id!(
    /// Index of an index in a realm.
    IndexId
);
realm_id!(
    /// Index of a single index part (column or expression) in a realm.
    IndexPartId
);
realm_id!(
    /// Index of a foreign key in a realm.
    ForeignKeyId
);
realm_id!(
    /// Index of one column pairing inside a foreign key.
    ForeignKeyColumnId
);
realm_id!(
    /// Index of a check constraint in a realm.
    CheckId
);
