//! Delivery and review lifecycle
//!
//! Work items move through a status state machine while producers hand over
//! deliveries and reviewers decide on them. Batches, sub-item statuses and
//! lateness are derived on every read from what is stored.

pub mod batch;
pub mod engine;
pub mod feedback;
pub mod lateness;
pub mod links;
pub mod work_item;

pub use batch::{BatchRef, DeliveryBatch, SubItemStatus, SubItemView, BATCH_WINDOW_SECS};
pub use engine::{EngineConfig, ResolvedLink, ReviewEngine, ReviewEvent};
pub use feedback::DecisionRequest;
pub use work_item::{
    NewWorkItem, SubItem, SubItemKind, TransitionPlan, WorkItem, WorkItemKind, WorkItemStatus,
    WorkflowVariant,
};
