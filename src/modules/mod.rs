pub mod audit;
pub mod config;
pub mod constraints;
pub mod error;
pub mod execution;
pub mod fact;
pub mod ir;
pub mod keccak;
pub mod llm;
pub mod resolve;
pub mod rule;
pub mod selector;
pub mod smt;
pub mod soltype;
pub mod solvers;
pub mod stepper;
pub mod term;
pub mod verifier;
pub mod verify;
