//! VK community wall ingestion.

mod client;
mod fetcher;
mod media;

pub use self::client::VkClient;
pub use self::fetcher::run_vk_cycle;
