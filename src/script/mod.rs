//! User scripts: the restricted language and the runner that injects
//! invocations into pages.

pub mod lang;
pub mod runner;

pub use lang::{Program, Step};
pub use runner::{build_args, ExecutionOutcome, Invocation, ScriptRunner, ScriptSource, ScriptTarget};
