//! Core business logic - framework-agnostic student, family and contract operations.

/// Tuition contracts
pub mod contract;
/// Family discount tiers
pub mod discount;
/// Sibling graph, ranks and discount propagation
pub mod family;
/// Student records
pub mod student;
