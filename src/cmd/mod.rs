//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `serve`     | `Serve`          |
//! | `run`       | `Run`            |
//! | `providers` | `Providers`      |
//! | `gate`      | `Gate`           |
//! | `config`    | `Config`         |

pub mod config;
pub mod gate;
pub mod providers;
pub mod run;
pub mod serve;

pub use config::cmd_config;
pub use gate::cmd_gate;
pub use providers::cmd_providers;
pub use run::cmd_run;
pub use serve::cmd_serve;
