// notifications_service/src/lib.rs

pub mod notifications;

pub use notifications::{ChangeEvent, ChangeFeed, ChangeOp, EntityKind, SubscriptionFilter};
