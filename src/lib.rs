//! A simulated market economy: a handful of independent services
//! coordinating purely over bus messages, no shared memory, no direct
//! service-to-service calls.

pub mod agent;
pub mod banker;
pub mod bus;
pub mod catalogue;
pub mod envelope;
pub mod error;
pub mod governor;
pub mod strategies;
pub mod topics;
pub mod validation;
pub mod world;
