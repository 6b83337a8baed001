mod crawler_config;
mod crawler_event;
mod crawler_run;

pub use crawler_config::CrawlerConfig;
pub use crawler_event::CrawlerEvent;
pub use crawler_run::{CrawlerRun, RunStatus};
