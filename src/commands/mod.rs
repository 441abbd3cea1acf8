//! Command implementations for the morlock CLI
//!
//! - **install**: install, uninstall and update
//! - **linking**: switch or remove the launcher of an installed package
//! - **list**: installed packages and their active versions
//! - **bootstrap**: self-installation of morlock and its toolchain
//! - **utils**: name resolution shared by the commands (internal)

pub mod bootstrap;
pub mod install;
pub mod linking;
pub mod list;
pub(crate) mod utils;

pub use bootstrap::bootstrap;
pub use install::{install, uninstall, update};
pub use linking::{link, unlink};
pub use list::list;
