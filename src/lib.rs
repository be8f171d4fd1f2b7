pub mod config;
pub mod elt;
pub mod scheduler;
pub mod logging;

pub mod util {
    pub mod db;
    pub mod env;
}
