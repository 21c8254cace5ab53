//! Macros for reducing boilerplate when defining entities
//!
//! These expand to plain builder calls, so anything they produce can also be
//! written by hand.

/// Build an ordered field list for [`entity`](crate::core::entity::entity).
/// A name listed twice makes `entity` fail.
///
/// # Example
/// ```rust
/// use zapi::prelude::*;
///
/// let user = entity("user", fields! {
///     name: string(),
///     email: string().email().unique(),
///     age: int().optional().min(0.0),
/// })
/// .unwrap()
/// .build()
/// .unwrap();
///
/// assert_eq!(user.config.fields.len(), 3);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        ::std::vec::Vec::<(&'static str, $crate::core::field::FieldSpec)>::new()
    };
    ($($name:ident : $spec:expr),+ $(,)?) => {{
        let fields: ::std::vec::Vec<(&'static str, $crate::core::field::FieldSpec)> = vec![
            $((stringify!($name), $crate::core::field::FieldSpec::from($spec))),+
        ];
        fields
    }};
}

/// Build a rule set keyed by operation
///
/// # Example
/// ```rust
/// use zapi::prelude::*;
///
/// let rules = rules! {
///     create: [RuleDef::Authenticated],
///     delete: [RuleDef::Admin],
/// };
///
/// assert_eq!(rules.len(), 2);
/// assert!(rules.contains_key(&Operation::Delete));
/// ```
#[macro_export]
macro_rules! rules {
    ($($op:ident : [$($rule:expr),* $(,)?]),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut set = $crate::core::entity::RuleSet::new();
        $(
            set.insert($crate::__operation!($op), vec![$($rule),*]);
        )*
        set
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __operation {
    (create) => {
        $crate::core::entity::Operation::Create
    };
    (read) => {
        $crate::core::entity::Operation::Read
    };
    (update) => {
        $crate::core::entity::Operation::Update
    };
    (delete) => {
        $crate::core::entity::Operation::Delete
    };
    (list) => {
        $crate::core::entity::Operation::List
    };
}
