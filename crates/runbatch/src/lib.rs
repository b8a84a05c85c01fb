#![doc = include_str!("../README.md")]

mod action;
mod deadline;
mod error;
mod event;
mod report;
mod request;
mod runner;
mod scheduler;
mod stats;

pub use crate::action::*;
pub use crate::error::*;
pub use crate::event::{EventKind, GenerationEvent};
pub use crate::report::*;
pub use crate::scheduler::*;
pub use crate::stats::StatsSnapshot;
