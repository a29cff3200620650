//! Cold-chain telemetry engine for BluConsole logger accounts: pulls the
//! vendor's XML feeds, summarizes uploaded temperature workbooks, and keeps
//! model-written answers about them honest.

pub mod client;
pub mod config;
pub mod models {
    pub mod blu;
    pub mod chat;
}
pub mod provider;
pub mod services {
    pub mod answer;
    pub mod context;
    pub mod exposure;
    pub mod snapshot;
    pub mod workbook;
}
pub mod store;
pub mod utils;
pub mod xml;
