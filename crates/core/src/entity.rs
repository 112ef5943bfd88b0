//! Entity trait for records that keep identity while their attributes change
//! (journals, ledger postings).

pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
