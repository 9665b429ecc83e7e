//! Analysis orchestration for Picscribe: single images and batches with
//! per-item failure isolation and guaranteed artifact cleanup.

pub mod coordinator;

pub use coordinator::BatchCoordinator;
