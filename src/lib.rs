pub mod config;
pub mod correlate;
pub mod db;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod rss;
pub mod stats;
pub mod telegram;
pub mod util;
pub mod vk;
pub mod web;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_VK: &str = "vk_request";
pub const TARGET_TG: &str = "tg_request";
