//! Host-state materialization.
//!
//! Mounts, security profiles, and IPC objects created on the machine running
//! the suite. Every helper that changes host state registers its undo on the
//! spec's cleanup stack.

pub mod apparmor;
pub mod command;
pub mod ipc;
pub mod mount;
pub mod seccomp;
pub mod selinux;
pub mod userns;

pub use command::{StderrPolicy, run_host_command};
pub use mount::Propagation;
pub use seccomp::SeccompProfile;
