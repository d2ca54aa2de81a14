//! Infrastructure layer: event store, unit of work, read models, and the
//! transfer/procurement workflow services built on top of them.

pub mod branches;
pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod event_store;
pub mod procurement_workflow;
pub mod read_model;
pub mod stats;
pub mod transfer_workflow;
pub mod unit_of_work;


pub use branches::{BranchDirectory, InMemoryBranchDirectory};
pub use error::{WorkflowError, WorkflowResult};
pub use procurement_workflow::{NewProcurement, ProcurementLine, ProcurementWorkflow};
pub use stats::{ProcurementStats, TransferStats};
pub use transfer_workflow::{NewTransfer, TransferLine, TransferWorkflow};
pub use unit_of_work::{InMemoryTransaction, InMemoryUnitOfWork, Transaction, UnitOfWork};
