pub mod deploy;

pub use deploy::{execute_deploy, run_deploy, run_with_session};
