pub mod lifecycle;
pub mod publisher;

pub use lifecycle::LifecycleEvent;
pub use publisher::{EventPublisher, PublishedEvent};
