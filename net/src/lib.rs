//! Rate-limited HTTP fetching with a two-tier cache and sitemap discovery.

mod cache;
mod client;
mod sitemap;
mod throttle;

pub use cache::RequestCache;
pub use client::{HttpClient, ProgressFn};
pub use sitemap::{SitemapParser, SitemapUrl, UrlFilters, export_urls, filter_urls};
pub use throttle::{BucketSnapshot, RateLimiter, TokenBucket};
