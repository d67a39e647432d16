//! Administration of an on-chain price oracle program: reading its account
//! graph, reconciling it with reference files, and submitting the resulting
//! instructions as size-bounded transactions.

pub mod chunking;
pub mod commands;
pub mod config;
pub mod dag;
pub mod fetch;
pub mod instructions;
pub mod keys;
pub mod linked_list;
pub mod permissions;
pub mod sender;
pub mod serializer;
pub mod sync;
