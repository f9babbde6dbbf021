//! docmigrate - versioned, hook-driven migrations for document databases
//!
//! The [`migrations`] core tracks which versions have been applied in a
//! tracking collection, plans the versions to run between the current and a
//! target version, and executes them with pre/post hooks. [`store`] defines
//! the narrow document-store surface it runs against; [`cli`] wraps it all
//! in a command line tool.

pub mod cli;
pub mod migrations;
pub mod output;
pub mod store;
