//! tickwork-terminal — shell command execution for shell-backed tasks.
//!
//! The scheduler only depends on the [`ProcessRunner`] trait; [`ShellRunner`]
//! is the production implementation (`sh -c` with timeout and output capping).
//!
//! ```rust,no_run
//! use tickwork_terminal::{ProcessRunner, ShellRunner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = ShellRunner::default();
//!     let result = runner.run("echo hello").await.unwrap();
//!     assert!(result.success);
//!     println!("{}", result.stdout);
//! }
//! ```

pub mod error;
pub mod output;
pub mod runner;
pub mod types;

pub use error::{Result, TerminalError};
pub use runner::{ProcessRunner, ShellRunner};
pub use types::{ExecOptions, ExecResult};
